//! Per-SKU HSM session pools.
//!
//! Each SKU owns its own fixed-size pool, opened lazily on first use and
//! cached for the server's lifetime, so a SKU's session pool size stays
//! constant across the server's lifetime once opened. Which backend a
//! pool is opened against — the always-available
//! software HSM or, behind the `pkcs11` feature, a real PKCS#11 token —
//! is a composition-root decision, not something the RPC handlers know
//! about.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use hsm_core::{HsmError, HsmPool, HsmResult, HsmSession};
#[cfg(not(feature = "pkcs11"))]
use hsm_core::KeyClass;
use sku_config::{ConfigResult, Sku, SkuManager};

use crate::error::{SpmError, SpmResult};

/// Opens and caches one [`HsmPool`] per SKU.
pub struct SpmPools {
    manager: Arc<SkuManager>,
    pools: DashMap<String, Arc<HsmPool>>,
    hsm_so: Option<PathBuf>,
}

impl SpmPools {
    pub fn new(manager: Arc<SkuManager>, hsm_so: Option<PathBuf>) -> Self {
        Self {
            manager,
            pools: DashMap::new(),
            hsm_so,
        }
    }

    pub fn manager(&self) -> &SkuManager {
        &self.manager
    }

    /// Resolve a SKU's configuration, loading it from disk on first use.
    pub fn sku(&self, name: &str) -> ConfigResult<Arc<Sku>> {
        self.manager.load(name)
    }

    /// Return this SKU's pool, opening it on first use.
    pub fn pool(&self, sku: &Sku) -> SpmResult<Arc<HsmPool>> {
        if let Some(existing) = self.pools.get(&sku.name) {
            return Ok(Arc::clone(&existing));
        }

        let pool = Arc::new(self.open_pool(sku)?);
        let pool = self
            .pools
            .entry(sku.name.clone())
            .or_insert_with(|| pool)
            .clone();
        Ok(pool)
    }

    #[cfg(feature = "pkcs11")]
    fn open_pool(&self, sku: &Sku) -> SpmResult<HsmPool> {
        let Some(library_path) = self.hsm_so.as_ref() else {
            return Err(SpmError::Hsm(HsmError::Fatal(
                "--hsm-so is required to open a real PKCS#11 session pool".to_string(),
            )));
        };
        let pin = std::env::var(&sku.hsm_pin_env).map_err(|_| {
            SpmError::Hsm(HsmError::Auth)
        })?;
        hsm_core::pkcs11_backend::open_pool(
            library_path,
            sku.hsm_slot,
            &pin,
            sku.pool_size,
            &sku.symmetric_keys,
            &sku.asymmetric_keys,
        )
        .map_err(SpmError::Hsm)
    }

    #[cfg(not(feature = "pkcs11"))]
    fn open_pool(&self, sku: &Sku) -> SpmResult<HsmPool> {
        let _ = &self.hsm_so;
        let size = sku.pool_size;
        HsmPool::open(size, |_| {
            let mut session = hsm_core::soft::SoftHsmSession::new();
            validate_configured_keys(&mut session, sku)?;
            Ok(Box::new(session) as Box<dyn HsmSession>)
        })
        .map_err(SpmError::Hsm)
    }
}

/// Resolve every key label the SKU's configuration names, so a missing
/// label fails pool creation outright rather than surfacing lazily the
/// first time some later RPC happens to touch it.
#[cfg(not(feature = "pkcs11"))]
fn validate_configured_keys(session: &mut dyn HsmSession, sku: &Sku) -> HsmResult<()> {
    for label in &sku.symmetric_keys {
        session.find_key(KeyClass::SecretKey, label)?;
    }
    for label in &sku.asymmetric_keys {
        session.find_key(KeyClass::PrivateKey, label)?;
    }
    Ok(())
}

/// Resolve the HSM-resident key label for a given seed selector from a
/// SKU's symmetric key list, by convention the label matching the
/// lower-snake-case seed name (`low_security`, `high_security`,
/// `keygen`).
pub fn seed_label(seed: otpa_proto::common::v1::SeedType) -> &'static str {
    use otpa_proto::common::v1::SeedType;
    match seed {
        SeedType::LowSecurity => "low_security",
        SeedType::HighSecurity => "high_security",
        SeedType::Keygen => "keygen",
        SeedType::Unspecified => "low_security",
    }
}

pub fn hsm_result<T>(r: HsmResult<T>) -> SpmResult<T> {
    r.map_err(SpmError::Hsm)
}
