use otpa_support::error::{DomainError, ErrorKind};
use thiserror::Error;

/// Failure modes for SKU loading: "missing file → NotFound;
/// malformed config → Config; unknown key label at HSM open → Config
/// (fails fast, no partial SKU registration)."
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration for SKU '{0}'")]
    NotFound(String),

    #[error("invalid configuration for SKU '{sku}': {reason}")]
    Config { sku: String, reason: String },
}

impl DomainError for ConfigError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::Config { .. } => ErrorKind::Internal,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
