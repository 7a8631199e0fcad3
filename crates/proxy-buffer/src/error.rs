use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device '{0}' already registered")]
    AlreadyExists(String),

    #[error("no record for device '{0}'")]
    NotFound(String),

    #[error("buffer is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("one or more ids in MarkAsSynced were not present: {0:?}")]
    MarkAsSyncedPartial(Vec<String>),
}

impl DomainError for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Full { .. } => ErrorKind::ResourceExhausted,
            StoreError::Io(_) => ErrorKind::Internal,
            StoreError::MarkAsSyncedPartial(_) => ErrorKind::Internal,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
