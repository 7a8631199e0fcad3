//! SKU manager: lazy-loads `sku_<name>.yml` from a
//! configuration root, caching each SKU under a read-mostly map keyed by
//! name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{RawSkuConfig, Sku};

/// Loads and caches SKU configuration from a directory of
/// `sku_<name>.yml` files.
pub struct SkuManager {
    root: PathBuf,
    cache: DashMap<String, Arc<Sku>>,
}

impl SkuManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("sku_{name}.yml"))
    }

    /// Load a SKU by name, or return the already-cached instance.
    /// Idempotent and thread-safe: concurrent callers loading the same
    /// name converge on the same `Arc<Sku>` instance.
    pub fn load(&self, name: &str) -> ConfigResult<Arc<Sku>> {
        if let Some(existing) = self.cache.get(name) {
            return Ok(Arc::clone(&existing));
        }

        let path = self.config_path(name);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::NotFound(name.to_string()))?;
        let raw: RawSkuConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Config {
                sku: name.to_string(),
                reason: format!("YAML parse error: {e}"),
            })?;
        validate(name, &raw)?;

        let sku = Arc::new(Sku::from_raw(name, raw));
        // `entry` avoids a second loader's work winning a race and
        // handing out a second, distinct `Arc` for the same name.
        let sku = self
            .cache
            .entry(name.to_string())
            .or_insert_with(|| sku)
            .clone();
        Ok(sku)
    }

    /// Return an already-loaded SKU, or `NotFound` if it hasn't been
    /// loaded (and is not found on disk either).
    pub fn get(&self, name: &str) -> ConfigResult<Arc<Sku>> {
        self.load(name)
    }

    pub fn method_allowed(&self, sku: &Sku, method: &str) -> bool {
        sku.method_allowed(method)
    }

    pub fn config_root(&self) -> &Path {
        &self.root
    }
}

fn validate(name: &str, raw: &RawSkuConfig) -> ConfigResult<()> {
    if raw.pool_size == 0 {
        return Err(ConfigError::Config {
            sku: name.to_string(),
            reason: "pool_size must be >= 1".to_string(),
        });
    }
    if raw.sku_auth_bcrypt_hash.is_empty() {
        return Err(ConfigError::Config {
            sku: name.to_string(),
            reason: "sku_auth_bcrypt_hash must not be empty".to_string(),
        });
    }
    if raw.authorized_methods.is_empty() {
        return Err(ConfigError::Config {
            sku: name.to_string(),
            reason: "authorized_methods must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sku(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("sku_{name}.yml")), body).unwrap();
    }

    const VALID: &str = r#"
hsm_slot: 0
hsm_pin_env: SIVAL_HSM_PIN
pool_size: 4
symmetric_keys: ["low_security", "high_security"]
asymmetric_keys: ["ca_key"]
certs:
  - label: ca_cert
    path: /certs/ca.pem
sku_auth_bcrypt_hash: "$2b$12$abcdefghijklmnopqrstuv"
authorized_methods: ["DeriveTokens", "EndorseCerts"]
policy:
  firmware_boot_message: "sival boot"
"#;

    #[test]
    fn load_is_idempotent_and_returns_the_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        write_sku(dir.path(), "sival", VALID);
        let manager = SkuManager::new(dir.path());

        let first = manager.load("sival").unwrap();
        let second = manager.load("sival").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SkuManager::new(dir.path());
        let err = manager.load("nope").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_sku(dir.path(), "bad", "not: valid: yaml: at: all: [");
        let manager = SkuManager::new(dir.path());
        let err = manager.load("bad").unwrap_err();
        assert!(matches!(err, ConfigError::Config { .. }));
    }

    #[test]
    fn empty_authorized_methods_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        write_sku(
            dir.path(),
            "empty",
            r#"
hsm_slot: 0
hsm_pin_env: X
pool_size: 1
sku_auth_bcrypt_hash: "$2b$12$abcdefghijklmnopqrstuv"
authorized_methods: []
"#,
        );
        let manager = SkuManager::new(dir.path());
        let err = manager.load("empty").unwrap_err();
        assert!(matches!(err, ConfigError::Config { .. }));
    }

    #[test]
    fn method_allowed_reflects_configured_set() {
        let dir = tempfile::tempdir().unwrap();
        write_sku(dir.path(), "sival", VALID);
        let manager = SkuManager::new(dir.path());
        let sku = manager.load("sival").unwrap();
        assert!(sku.method_allowed("DeriveTokens"));
        assert!(!sku.method_allowed("RegisterDevice"));
    }
}
