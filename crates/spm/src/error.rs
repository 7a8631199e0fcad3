use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

/// Errors raised by the SPM's own request handling, as distinct from
/// `hsm_core::HsmError` (wrapped verbatim) and `sku_config::ConfigError`
/// (also wrapped verbatim) — both already implement [`DomainError`], so
/// this enum only needs a variant for logic the SPM owns.
#[derive(Debug, Error)]
pub enum SpmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("device data hash mismatch")]
    HashMismatch,

    #[error("malformed device data: {0}")]
    MalformedDeviceData(String),

    #[error(transparent)]
    Hsm(#[from] hsm_core::HsmError),

    #[error(transparent)]
    Config(#[from] sku_config::ConfigError),

    #[error("certificate error: {0}")]
    Cert(String),
}

impl DomainError for SpmError {
    fn kind(&self) -> ErrorKind {
        match self {
            SpmError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SpmError::MacMismatch => ErrorKind::PermissionDenied,
            SpmError::HashMismatch => ErrorKind::FailedPrecondition,
            SpmError::MalformedDeviceData(_) => ErrorKind::InvalidArgument,
            SpmError::Hsm(e) => DomainError::kind(e),
            SpmError::Config(e) => DomainError::kind(e),
            SpmError::Cert(_) => ErrorKind::Internal,
        }
    }
}

pub type SpmResult<T> = Result<T, SpmError>;
