//! SKU data model.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Deserialize;

/// A named certificate preloaded for a SKU: an HSM key label paired with
/// the PEM/DER file it should be endorsed from or compared against.
#[derive(Debug, Clone, Deserialize)]
pub struct CertEntry {
    pub label: String,
    pub path: PathBuf,
}

/// Per-SKU policy blobs: KDF salts keyed by seed name, plus the owner
/// firmware-boot banner returned by `GetOwnerFwBootMessage`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SkuPolicy {
    #[serde(default)]
    pub kdf_salts: HashMap<String, String>,
    #[serde(default)]
    pub firmware_boot_message: Option<String>,
}

/// Shape of a `sku_<name>.yml` file on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSkuConfig {
    pub hsm_slot: u64,
    pub hsm_pin_env: String,
    pub pool_size: usize,
    #[serde(default)]
    pub symmetric_keys: Vec<String>,
    #[serde(default)]
    pub asymmetric_keys: Vec<String>,
    #[serde(default)]
    pub certs: Vec<CertEntry>,
    pub sku_auth_bcrypt_hash: String,
    #[serde(default)]
    pub authorized_methods: Vec<String>,
    #[serde(default)]
    pub policy: SkuPolicy,
}

/// A fully loaded, validated SKU. Immutable for the server lifetime once
/// loaded; cheap to clone behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Sku {
    pub name: String,
    pub hsm_slot: u64,
    pub hsm_pin_env: String,
    pub pool_size: usize,
    pub symmetric_keys: Vec<String>,
    pub asymmetric_keys: Vec<String>,
    pub certs: HashMap<String, PathBuf>,
    pub sku_auth_bcrypt_hash: String,
    pub authorized_methods: HashSet<String>,
    pub policy: SkuPolicy,
}

impl Sku {
    pub(crate) fn from_raw(name: &str, raw: RawSkuConfig) -> Self {
        let certs = raw
            .certs
            .into_iter()
            .map(|entry| (entry.label, entry.path))
            .collect();
        Self {
            name: name.to_string(),
            hsm_slot: raw.hsm_slot,
            hsm_pin_env: raw.hsm_pin_env,
            pool_size: raw.pool_size,
            symmetric_keys: raw.symmetric_keys,
            asymmetric_keys: raw.asymmetric_keys,
            certs,
            sku_auth_bcrypt_hash: raw.sku_auth_bcrypt_hash,
            authorized_methods: raw.authorized_methods.into_iter().collect(),
            policy: raw.policy,
        }
    }

    pub fn method_allowed(&self, method: &str) -> bool {
        self.authorized_methods.contains(method)
    }
}
