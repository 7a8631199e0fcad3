//! Proxy Buffer server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;

use otpa_proto::pb::v1::proxy_buffer_server::ProxyBufferServer;
use otpa_support::CommonArgs;
use proxy_buffer::{ProxyBufferService, ProxyBufferStore, StoreCapacity, Syncer, SyncerConfig};
use registry_client::http::HttpRegistry;
use registry_client::Registry;

#[derive(Debug, Parser)]
#[command(name = "proxy-buffer-server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the durable store file.
    #[arg(long)]
    db_path: PathBuf,

    /// Base URL of the upstream device registry.
    #[arg(long)]
    registry_endpoint: String,

    /// Optional cap on buffered-but-unsynced records.
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Syncer tick frequency, in seconds.
    #[arg(long, default_value_t = 30)]
    sync_frequency_secs: u64,

    /// Records drained from the store per syncer tick.
    #[arg(long, default_value_t = 100)]
    records_per_run: usize,

    /// Retries allowed per record before it is reported as fatal.
    /// Omit for unbounded retries.
    #[arg(long)]
    max_retries_per_record: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = otpa_support::init_tracing(otpa_support::TracingConfig {
        log_dir: "logs".to_string(),
        log_prefix: "proxy-buffer",
        console: true,
    });

    let store = Arc::new(ProxyBufferStore::open(
        &cli.db_path,
        StoreCapacity(cli.buffer_capacity),
    )?);

    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(cli.registry_endpoint));
    let (syncer, mut fatal_rx) = Syncer::new(
        store.clone(),
        registry,
        SyncerConfig {
            frequency: Duration::from_secs(cli.sync_frequency_secs),
            records_per_run: cli.records_per_run,
            max_retries_per_record: cli.max_retries_per_record,
        },
    );

    let syncer_handle = tokio::spawn(syncer.clone().run());
    tokio::spawn(async move {
        while let Some(fatal) = fatal_rx.recv().await {
            tracing::error!(error = %fatal, "syncer reported a fatal, unrecoverable batch failure");
        }
    });

    let service = ProxyBufferService::new(store);
    let addr = format!("0.0.0.0:{}", cli.common.port).parse()?;

    let mut server = Server::builder();
    if let Some(tls) = cli.common.tls_config()? {
        server = server.tls_config(tls)?;
    }

    tracing::info!(%addr, "proxy buffer listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight requests");
    };

    server
        .add_service(ProxyBufferServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;

    syncer.stop();
    let _ = syncer_handle.await;
    Ok(())
}
