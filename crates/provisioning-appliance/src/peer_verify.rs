//! Optional peer-identity verification, enabled only when
//! mTLS is on: the client's connection IP is compared against the SANs
//! on the certificate it presented during the TLS handshake.
//!
//! A reverse-DNS hostname fallback is deliberately not implemented here
//! — this workspace carries no DNS resolver crate, and adding one
//! purely for a fallback path on an already-optional check did not seem
//! worth the new dependency. IP-SAN matching is the effective check;
//! see DESIGN.md for the tradeoff.

use der::Decode;
use tonic::{Request, Status};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::Certificate;

const SUBJECT_ALT_NAME_OID: &str = "2.5.29.17";

/// Compare `request`'s TLS peer certificate SANs against its connection
/// IP. No peer certificate (e.g. TLS disabled) is a mismatch, since this
/// check is only invoked when the caller has already confirmed mTLS is
/// enabled.
pub fn verify_peer<T>(request: &Request<T>) -> Result<(), Status> {
    let remote_ip = request
        .remote_addr()
        .ok_or_else(|| Status::unauthenticated("no peer address available for identity check"))?
        .ip();

    let certs = request
        .peer_certs()
        .ok_or_else(|| Status::unauthenticated("client presented no certificate"))?;

    for cert in certs.iter() {
        let Ok(certificate) = Certificate::from_der(cert.as_ref()) else {
            continue;
        };
        let Some(extensions) = certificate.tbs_certificate.extensions.as_ref() else {
            continue;
        };
        let Some(extension) = extensions
            .iter()
            .find(|ext| ext.extn_id.to_string() == SUBJECT_ALT_NAME_OID)
        else {
            continue;
        };
        let Ok(san) = SubjectAltName::from_der(extension.extn_value.as_bytes()) else {
            continue;
        };
        for name in san.0.iter() {
            if let GeneralName::IpAddress(bytes) = name {
                if ip_matches(bytes.as_bytes(), remote_ip) {
                    return Ok(());
                }
            }
        }
    }

    Err(Status::unauthenticated(
        "client certificate SANs do not include the connection's peer IP",
    ))
}

fn ip_matches(der_bytes: &[u8], ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => der_bytes == v4.octets(),
        std::net::IpAddr::V6(v6) => der_bytes == v6.octets(),
    }
}
