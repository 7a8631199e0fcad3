//! Provisioning Appliance server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::{Channel, Server};

use otpa_proto::pa::v1::provisioning_appliance_server::ProvisioningApplianceServer;
use otpa_proto::spm::v1::secure_provisioning_module_client::SecureProvisioningModuleClient;
use otpa_support::CommonArgs;
use provisioning_appliance::{PaService, SessionMap};
use registry_client::grpc::GrpcRegistry;
use sku_config::SkuManager;

#[derive(Debug, Parser)]
#[command(name = "pa-server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory of `sku_<name>.yml` configuration files.
    #[arg(long)]
    sku_config_dir: PathBuf,

    /// SPM endpoint this PA forwards provisioning RPCs to.
    #[arg(long)]
    spm_endpoint: String,

    /// Proxy Buffer endpoint `RegisterDevice` is handed off to.
    #[arg(long)]
    pb_endpoint: String,

    /// Address returned to clients in `InitSessionResponse.pa_endpoint`.
    #[arg(long)]
    pa_endpoint: String,

    /// Session lifetime before the sweeper reclaims it.
    #[arg(long, default_value_t = 900)]
    session_ttl_secs: u64,

    /// Sweeper interval.
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Require the client's mTLS certificate SANs to match its
    /// connection IP on every authorized RPC.
    #[arg(long)]
    enable_peer_verification: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = otpa_support::init_tracing(otpa_support::TracingConfig {
        log_dir: "logs".to_string(),
        log_prefix: "pa",
        console: true,
    });

    let manager = Arc::new(SkuManager::new(cli.sku_config_dir.clone()));
    let sessions = Arc::new(SessionMap::new(Duration::from_secs(cli.session_ttl_secs)));

    let spm_channel = Channel::from_shared(cli.spm_endpoint.clone())?.connect_lazy();
    let spm_client = SecureProvisioningModuleClient::new(spm_channel);

    let registry = Arc::new(GrpcRegistry::connect_lazy(cli.pb_endpoint.clone())?);

    let service = PaService::new(
        manager,
        sessions.clone(),
        spm_client,
        registry,
        cli.pa_endpoint.clone(),
        cli.enable_peer_verification,
    );

    let addr = format!("0.0.0.0:{}", cli.common.port).parse()?;
    let mut server = Server::builder();
    if let Some(tls) = cli.common.tls_config()? {
        server = server.tls_config(tls)?;
    }

    let sweep_interval = Duration::from_secs(cli.sweep_interval_secs);
    let sweeper_sessions = sessions.clone();
    let mut sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let removed = sweeper_sessions.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, "swept expired sessions");
            }
        }
    });

    tracing::info!(%addr, "pa listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight requests");
    };

    let serve = server
        .add_service(ProvisioningApplianceServer::new(service))
        .serve_with_shutdown(addr, shutdown);

    tokio::select! {
        result = serve => result?,
        _ = &mut sweeper => {}
    }
    sweeper.abort();

    Ok(())
}
