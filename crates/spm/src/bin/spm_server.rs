//! SPM server binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tonic::transport::Server;

use otpa_proto::spm::v1::secure_provisioning_module_server::SecureProvisioningModuleServer;
use otpa_support::CommonArgs;
use sku_config::SkuManager;
use spm::{SpmPools, SpmService};

#[derive(Debug, Parser)]
#[command(name = "spm-server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory of `sku_<name>.yml` configuration files.
    #[arg(long)]
    spm_config_dir: PathBuf,

    /// Path to a PKCS#11 shared object. Only consulted when this binary
    /// is built with the `pkcs11` feature; otherwise every SKU is
    /// served from the in-process software HSM.
    #[arg(long)]
    hsm_so: Option<PathBuf>,

    /// File containing the HSM PIN/password, applied as the value of
    /// each configured SKU's `hsm_pin_env` before its pool is first
    /// opened.
    #[arg(long)]
    hsm_password_file: Option<PathBuf>,
}

fn preload_hsm_passwords(cli: &Cli, manager: &SkuManager) -> anyhow::Result<()> {
    let Some(path) = &cli.hsm_password_file else {
        return Ok(());
    };
    let password = std::fs::read_to_string(path)?.trim().to_string();
    for entry in std::fs::read_dir(&cli.spm_config_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(sku_name) = file_name
            .strip_prefix("sku_")
            .and_then(|rest| rest.strip_suffix(".yml"))
        else {
            continue;
        };
        if let Ok(sku) = manager.load(sku_name) {
            std::env::set_var(&sku.hsm_pin_env, &password);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = otpa_support::init_tracing(otpa_support::TracingConfig {
        log_dir: "logs".to_string(),
        log_prefix: "spm",
        console: true,
    });

    let manager = Arc::new(SkuManager::new(cli.spm_config_dir.clone()));
    preload_hsm_passwords(&cli, &manager)?;

    let pools = Arc::new(SpmPools::new(manager, cli.hsm_so.clone()));
    let service = SpmService::new(pools);
    let addr = format!("0.0.0.0:{}", cli.common.port).parse()?;

    let mut server = Server::builder();
    if let Some(tls) = cli.common.tls_config()? {
        server = server.tls_config(tls)?;
    }

    tracing::info!(%addr, "spm listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight requests");
    };

    server
        .add_service(SecureProvisioningModuleServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;

    Ok(())
}
