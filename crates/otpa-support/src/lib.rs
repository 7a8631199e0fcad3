//! Cross-cutting support shared by the PA, SPM and proxy buffer: error
//! mapping to `tonic::Status`, tracing setup, CLI flags, and session
//! token / constant-time helpers.

pub mod cli;
pub mod error;
pub mod token;
pub mod tracing_init;

pub use cli::CommonArgs;
pub use tracing_init::{init_tracing, TracingConfig};
