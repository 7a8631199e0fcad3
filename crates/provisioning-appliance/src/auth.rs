//! Per-RPC session authorization: extract the session token
//! from the `x-opentitan-auth-token` header, verify it exists and has
//! not expired, and that the method being called is in the session's
//! authorized set.

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::session::SessionMap;

/// Verify the caller holds a live, authorized session for `sku` to
/// invoke `method`. The header may repeat when a client holds
/// credentials for multiple SKUs; every value is checked until one
/// names a live session for `sku`.
pub fn authorize(sessions: &SessionMap, metadata: &MetadataMap, sku: &str, method: &str) -> Result<(), Status> {
    let mut saw_matching_sku = false;

    for value in metadata.get_all(otpa_proto::AUTH_TOKEN_HEADER).iter() {
        let token = value
            .to_str()
            .map_err(|_| Status::unauthenticated("malformed auth token header"))?;
        let Some(session) = sessions.get(token) else {
            continue;
        };
        if session.sku != sku {
            continue;
        }
        saw_matching_sku = true;
        if session.authorized_methods.contains(method) {
            return Ok(());
        }
    }

    if saw_matching_sku {
        Err(Status::permission_denied(format!(
            "session is not authorized to invoke {method}"
        )))
    } else {
        Err(Status::unauthenticated("missing or expired session token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tonic::Request;

    fn sessions_with(token: &str, sku: &str, methods: &[&str]) -> SessionMap {
        let map = SessionMap::new(Duration::from_secs(60));
        map.create(
            token.to_string(),
            sku.to_string(),
            methods.iter().map(|m| m.to_string()).collect(),
        );
        map
    }

    fn request_with_token(token: &str) -> Request<()> {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(otpa_proto::AUTH_TOKEN_HEADER, token.parse().unwrap());
        request
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let sessions = SessionMap::new(Duration::from_secs(60));
        let request = Request::new(());
        let err = authorize(&sessions, request.metadata(), "sival", "DeriveTokens").unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn authorized_method_succeeds() {
        let sessions = sessions_with("tok", "sival", &["DeriveTokens"]);
        let request = request_with_token("tok");
        authorize(&sessions, request.metadata(), "sival", "DeriveTokens").unwrap();
    }

    #[test]
    fn unauthorized_method_is_permission_denied() {
        let sessions = sessions_with("tok", "sival", &["DeriveTokens"]);
        let request = request_with_token("tok");
        let err = authorize(&sessions, request.metadata(), "sival", "EndorseCerts").unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn unknown_sku_for_a_live_token_is_unauthenticated() {
        let sessions = sessions_with("tok", "sival", &["DeriveTokens"]);
        let request = request_with_token("tok");
        let err = authorize(&sessions, request.metadata(), "cr01", "DeriveTokens").unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }
}
