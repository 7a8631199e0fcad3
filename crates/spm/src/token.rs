//! `DeriveTokens`.
//!
//! Each parameter set leases one HSM session for the KDF (and, when
//! requested, the seed-wrap) and does every bit of CPU-bound hashing
//! afterwards, outside the lease, so pool utilization stays high under
//! concurrent callers.

use hsm_core::{HsmPool, KeyClass};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::CShake128;
use sku_config::Sku;

use otpa_proto::common::v1::{DerivedToken, SeedType, TokenParams, TokenType};

use crate::error::{SpmError, SpmResult};
use crate::pools::{hsm_result, seed_label};

const HASHED_LC_TOKEN_CUSTOMIZATION: &[u8] = b"LC_CTRL";
const HASHED_LC_TOKEN_BYTES: usize = 16;
const WRAP_KEY_LABEL: &str = "wrap_key";

fn token_size_bytes(size: i32) -> SpmResult<usize> {
    match size {
        1 => Ok(16),
        2 => Ok(32),
        other => Err(SpmError::InvalidArgument(format!(
            "unknown token size ordinal {other}"
        ))),
    }
}

fn hashed_lc_token(derived: &[u8]) -> Vec<u8> {
    let mut hasher = CShake128::new(HASHED_LC_TOKEN_CUSTOMIZATION);
    hasher.update(derived);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; HASHED_LC_TOKEN_BYTES];
    reader.read(&mut out);
    out.to_vec()
}

/// Derive one token, leasing a session from `pool` for the HSM half of
/// the work.
pub async fn derive_token(pool: &HsmPool, sku: &Sku, params: &TokenParams) -> SpmResult<DerivedToken> {
    let seed = SeedType::try_from(params.seed).unwrap_or(SeedType::Unspecified);
    let token_type = TokenType::try_from(params.token_type).unwrap_or(TokenType::Unspecified);
    if seed == SeedType::Keygen && !params.wrap_seed {
        return Err(SpmError::InvalidArgument(
            "wrap_seed is required when seed=Keygen".to_string(),
        ));
    }
    let out_len = token_size_bytes(params.size)?;
    let label = seed_label(seed);
    let salt = sku
        .policy
        .kdf_salts
        .get(label)
        .map(|s| s.as_bytes().to_vec())
        .unwrap_or_default();
    let diversifier = params.diversifier.clone();
    let wrap_seed = params.wrap_seed;

    let (derived, wrapped_seed) = hsm_result(
        pool.with(move |session| {
            let key = session.find_key(KeyClass::SecretKey, label)?;
            let derived = session.kdf_derive(key, &salt, &diversifier, out_len)?;
            let wrapped_seed = if wrap_seed {
                let wrap_key = session.find_key(KeyClass::PrivateKey, WRAP_KEY_LABEL)?;
                Some(session.wrap_seed(wrap_key, &derived)?)
            } else {
                None
            };
            Ok((derived, wrapped_seed))
        })
        .await,
    )?;

    let token = match token_type {
        TokenType::HashedLcToken => hashed_lc_token(&derived),
        TokenType::Raw | TokenType::Unspecified => derived,
    };

    Ok(DerivedToken {
        token,
        wrapped_seed: wrapped_seed.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsm_core::HsmPool;
    use hsm_core::soft::SoftHsmSession;
    use sku_config::SkuPolicy;
    use std::collections::HashMap;

    fn test_sku() -> Sku {
        Sku {
            name: "sival".to_string(),
            hsm_slot: 0,
            hsm_pin_env: "X".to_string(),
            pool_size: 1,
            symmetric_keys: vec!["low_security".to_string()],
            asymmetric_keys: vec!["wrap_key".to_string()],
            certs: HashMap::new(),
            sku_auth_bcrypt_hash: String::new(),
            authorized_methods: Default::default(),
            policy: SkuPolicy::default(),
        }
    }

    fn test_pool() -> HsmPool {
        HsmPool::open(1, |_| {
            Ok(Box::new(SoftHsmSession::new()) as Box<dyn hsm_core::HsmSession>)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn raw_token_derivation_is_deterministic() {
        let pool = test_pool();
        let sku = test_sku();
        let params = TokenParams {
            seed: SeedType::LowSecurity as i32,
            token_type: TokenType::Raw as i32,
            size: 1,
            diversifier: vec![0x01],
            wrap_seed: false,
        };
        let a = derive_token(&pool, &sku, &params).await.unwrap();
        let b = derive_token(&pool, &sku, &params).await.unwrap();
        assert_eq!(a.token, b.token);
        assert_eq!(a.token.len(), 16);
        assert!(a.wrapped_seed.is_empty());
    }

    #[tokio::test]
    async fn hashed_lc_token_is_16_bytes_and_differs_from_raw() {
        let pool = test_pool();
        let sku = test_sku();
        let raw_params = TokenParams {
            seed: SeedType::LowSecurity as i32,
            token_type: TokenType::Raw as i32,
            size: 2,
            diversifier: vec![0x02],
            wrap_seed: false,
        };
        let hashed_params = TokenParams {
            token_type: TokenType::HashedLcToken as i32,
            ..raw_params.clone()
        };
        let raw = derive_token(&pool, &sku, &raw_params).await.unwrap();
        let hashed = derive_token(&pool, &sku, &hashed_params).await.unwrap();
        assert_eq!(raw.token.len(), 32);
        assert_eq!(hashed.token.len(), 16);
        assert_ne!(raw.token, hashed.token);
    }

    #[tokio::test]
    async fn wrap_seed_returns_a_wrapped_copy() {
        let pool = test_pool();
        let sku = test_sku();
        let params = TokenParams {
            seed: SeedType::Keygen as i32,
            token_type: TokenType::Raw as i32,
            size: 1,
            diversifier: vec![],
            wrap_seed: true,
        };
        let derived = derive_token(&pool, &sku, &params).await.unwrap();
        assert!(!derived.wrapped_seed.is_empty());
    }

    #[tokio::test]
    async fn keygen_without_wrap_seed_is_rejected() {
        let pool = test_pool();
        let sku = test_sku();
        let params = TokenParams {
            seed: SeedType::Keygen as i32,
            token_type: TokenType::Raw as i32,
            size: 1,
            diversifier: vec![],
            wrap_seed: false,
        };
        let err = derive_token(&pool, &sku, &params).await.unwrap_err();
        assert!(matches!(err, SpmError::InvalidArgument(_)));
    }
}
