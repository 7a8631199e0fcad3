//! Provisioning Appliance: the client-facing gRPC front end.
//! Issues sessions, gates every RPC behind a per-SKU session token, and
//! fans out to the SPM and the registry shim.

pub mod auth;
pub mod error;
pub mod peer_verify;
pub mod service;
pub mod session;

pub use error::{PaError, PaResult};
pub use service::PaService;
pub use session::{Session, SessionMap};
