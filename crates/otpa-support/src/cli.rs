//! Common CLI flags shared by the `pa-server`, `spm-server` and
//! `proxy-buffer-server` binaries. Each binary flattens this
//! into its own `clap::Parser` alongside its component-specific flags.

use std::path::PathBuf;

use clap::Args;
use tonic::transport::{Identity, ServerTlsConfig};

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Port to bind the gRPC server on.
    #[arg(long, default_value_t = 50051)]
    pub port: u16,

    /// Require mTLS; without it the server accepts plaintext (dev only).
    #[arg(long)]
    pub enable_tls: bool,

    /// PEM certificate chain for this service's TLS identity.
    #[arg(long)]
    pub service_cert: Option<PathBuf>,

    /// PEM private key for this service's TLS identity.
    #[arg(long)]
    pub service_key: Option<PathBuf>,

    /// PEM bundle of CA roots used to validate client certificates.
    #[arg(long)]
    pub ca_root_certs: Option<PathBuf>,
}

impl CommonArgs {
    /// Build a `tonic` server TLS config requiring a client cert signed
    /// by `ca_root_certs`: mTLS is mandatory in production, with the
    /// server validating the client cert against the CA file.
    pub fn tls_config(&self) -> anyhow::Result<Option<ServerTlsConfig>> {
        if !self.enable_tls {
            return Ok(None);
        }
        let cert_path = self
            .service_cert
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--service-cert is required when --enable-tls is set"))?;
        let key_path = self
            .service_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--service-key is required when --enable-tls is set"))?;
        let ca_path = self
            .ca_root_certs
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--ca-root-certs is required when --enable-tls is set"))?;

        let cert = std::fs::read(cert_path)?;
        let key = std::fs::read(key_path)?;
        let ca_cert = std::fs::read(ca_path)?;

        let identity = Identity::from_pem(cert, key);
        let client_ca = tonic::transport::Certificate::from_pem(ca_cert);

        Ok(Some(
            ServerTlsConfig::new()
                .identity(identity)
                .client_ca_root(client_ca),
        ))
    }
}
