use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

/// HSM errors, collapsed to four kinds: any PKCS#11 error surfaces as
/// one of `{NotFound, Auth, Transient, Fatal}`, and `Transient` is the
/// only kind retried by callers.
#[derive(Debug, Error)]
pub enum HsmError {
    #[error("key not found: class={class:?} label={label}")]
    NotFound { class: crate::KeyClass, label: String },

    #[error("HSM authentication failed")]
    Auth,

    #[error("transient HSM error: {0}")]
    Transient(String),

    #[error("fatal HSM error: {0}")]
    Fatal(String),
}

impl HsmError {
    /// Whether a caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HsmError::Transient(_))
    }
}

impl DomainError for HsmError {
    fn kind(&self) -> ErrorKind {
        match self {
            HsmError::NotFound { .. } => ErrorKind::NotFound,
            HsmError::Auth => ErrorKind::Unauthenticated,
            HsmError::Transient(_) => ErrorKind::Unavailable,
            HsmError::Fatal(_) => ErrorKind::Internal,
        }
    }
}

pub type HsmResult<T> = Result<T, HsmError>;
