//! Shared error-kind → gRPC status mapping.
//!
//! Every domain crate (`hsm-core`, `sku-config`, `spm`, `proxy-buffer`,
//! `provisioning-appliance`) defines its own `thiserror`-derived error
//! enum and implements [`DomainError`] for it. This crate owns the single
//! conversion surface from a domain error to `tonic::Status` so the
//! mapping is applied consistently everywhere instead of once per
//! service.

use tonic::Status;
use uuid::Uuid;

/// The gRPC-flavored error classes every RPC surface in this workspace
/// can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    FailedPrecondition,
    AlreadyExists,
    ResourceExhausted,
    Internal,
    Unavailable,
}

/// Implemented by every domain error enum so `otpa-support` can translate
/// it into a `tonic::Status` without each service hand-rolling the match.
pub trait DomainError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}

impl<E: DomainError> From<E> for Status {
    fn from(err: E) -> Self {
        to_status(err.kind(), &err)
    }
}

/// Render a domain error as a `Status`, never leaking `Internal` detail
/// to the caller: a correlation id is logged and a generic message
/// returned instead.
pub fn to_status(kind: ErrorKind, err: &dyn std::error::Error) -> Status {
    match kind {
        ErrorKind::InvalidArgument => Status::invalid_argument(err.to_string()),
        ErrorKind::Unauthenticated => Status::unauthenticated(err.to_string()),
        ErrorKind::PermissionDenied => Status::permission_denied(err.to_string()),
        ErrorKind::NotFound => Status::not_found(err.to_string()),
        ErrorKind::FailedPrecondition => Status::failed_precondition(err.to_string()),
        ErrorKind::AlreadyExists => Status::already_exists(err.to_string()),
        ErrorKind::ResourceExhausted => Status::resource_exhausted(err.to_string()),
        ErrorKind::Unavailable => Status::unavailable(err.to_string()),
        ErrorKind::Internal => {
            let correlation_id = Uuid::new_v4();
            tracing::error!(%correlation_id, error = %err, "internal error");
            Status::internal(format!(
                "internal error, correlation_id={correlation_id}"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    impl DomainError for Boom {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Internal
        }
    }

    #[test]
    fn internal_errors_do_not_leak_message_text() {
        let status: Status = Boom.into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("boom"));
        assert!(status.message().contains("correlation_id="));
    }

    #[test]
    fn not_found_passes_message_through() {
        #[derive(Debug, Error)]
        #[error("no such sku")]
        struct Missing;
        impl DomainError for Missing {
            fn kind(&self) -> ErrorKind {
                ErrorKind::NotFound
            }
        }
        let status: Status = Missing.into();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "no such sku");
    }
}
