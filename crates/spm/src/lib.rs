//! Secure Provisioning Module: the HSM-facing crypto
//! service. All private key material stays behind `hsm-core`'s leased
//! sessions; this crate owns the RPC-shaped logic layered on top of it
//! (token derivation, certificate endorsement, data verification, CA
//! key inventory) and the per-SKU session pool lifecycle.

pub mod certs;
pub mod device_data;
pub mod error;
pub mod pools;
pub mod service;
pub mod token;

pub use error::{SpmError, SpmResult};
pub use pools::SpmPools;
pub use service::SpmService;
