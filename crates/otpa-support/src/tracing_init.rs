//! Process-wide tracing setup shared by the `pa-server`, `spm-server` and
//! `proxy-buffer-server` binaries.
//!
//! A non-blocking rolling
//! file appender composed with an optional pretty console layer, driven
//! by `EnvFilter`. The returned [`tracing_appender::non_blocking::WorkerGuard`]
//! must be held for the process lifetime — dropping it stops the writer
//! thread and silently truncates the log.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which binary is initializing tracing; used only to name the log file.
pub struct TracingConfig {
    pub log_dir: String,
    pub log_prefix: &'static str,
    pub console: bool,
}

/// Initialize the global `tracing` subscriber.
///
/// Returns the `WorkerGuard` the caller must hold until shutdown.
pub fn init_tracing(config: TracingConfig) -> WorkerGuard {
    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &config.log_dir, config.log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_target(true);

    if config.console {
        let console_layer = fmt::layer().with_writer(std::io::stdout).with_target(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(console_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .init();
    }

    guard
}
