use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unavailable(String),

    #[error("registry returned an unexpected response: {0}")]
    Internal(String),
}

impl DomainError for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Unavailable(_) => ErrorKind::Unavailable,
            RegistryError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
