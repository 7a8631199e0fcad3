//! The external device registry's interface: `BatchRegisterDevice`,
//! returning per-record `{device_id, status, rpc_status}`. Transports
//! (HTTP+JSON, gRPC, …) are pluggable.
//!
//! The syncer (`proxy-buffer`) and the PA's registry shim both depend
//! only on [`Registry`]; which implementation is wired in is a
//! composition-root choice, never a source substitution.

pub mod error;
pub mod fake;
pub mod grpc;
pub mod http;

pub use error::{RegistryError, RegistryResult};

use async_trait::async_trait;
use otpa_proto::common::v1::{RegisterDeviceResponse, RegistryRecord};

/// The registry's single method, batched. A non-batch single-record
/// register is just a batch of one; every caller in this workspace goes
/// through `batch_register_device`.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn batch_register_device(
        &self,
        records: Vec<RegistryRecord>,
    ) -> RegistryResult<Vec<RegisterDeviceResponse>>;
}
