//! Proxy Buffer: a durable write-ahead staging store plus a
//! background syncer that batch-publishes to an external registry.

pub mod error;
pub mod service;
pub mod store;
pub mod syncer;

pub use error::{StoreError, StoreResult};
pub use service::ProxyBufferService;
pub use store::{ProxyBufferStore, StoreCapacity};
pub use syncer::{FatalSyncError, Syncer, SyncerConfig};
