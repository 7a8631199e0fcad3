use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

/// Errors the PA's own gate logic can raise, as distinct from
/// `sku_config::ConfigError` and `registry_client::RegistryError`
/// (wrapped verbatim) and errors forwarded from the SPM, which arrive
/// already as a `tonic::Status` and are propagated unmodified — except
/// that `Internal` is never leaked with details to the caller.
#[derive(Debug, Error)]
pub enum PaError {
    #[error("missing or expired session token")]
    MissingSession,

    #[error("session is not authorized to invoke {0}")]
    MethodNotAuthorized(String),

    #[error("SKU auth verification failed")]
    BadPassword,

    #[error("peer identity check failed")]
    PeerMismatch,

    #[error(transparent)]
    Config(#[from] sku_config::ConfigError),

    #[error(transparent)]
    Registry(#[from] registry_client::RegistryError),
}

impl DomainError for PaError {
    fn kind(&self) -> ErrorKind {
        match self {
            PaError::MissingSession => ErrorKind::Unauthenticated,
            PaError::MethodNotAuthorized(_) => ErrorKind::PermissionDenied,
            PaError::BadPassword => ErrorKind::Unauthenticated,
            PaError::PeerMismatch => ErrorKind::Unauthenticated,
            PaError::Config(e) => DomainError::kind(e),
            PaError::Registry(e) => DomainError::kind(e),
        }
    }
}

pub type PaResult<T> = Result<T, PaError>;
