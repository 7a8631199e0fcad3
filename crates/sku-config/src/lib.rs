//! SKU manager: loads per-SKU configuration from
//! `sku_<name>.yml` files, caches it, and answers per-method
//! authorization checks.

pub mod error;
pub mod manager;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use manager::SkuManager;
pub use model::{CertEntry, RawSkuConfig, Sku, SkuPolicy};
