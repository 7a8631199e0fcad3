//! Software HSM for development and testing.
//!
//! Never wired into a "production" feature set: key material lives in
//! process memory instead of inside a token. Every key is materialized
//! lazily and deterministically from its `(class, label)` so that two
//! sessions opened against the same labels agree on the same key, the
//! way a real token pre-provisioned with the SKU's key set would.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use rand::{RngCore, SeedableRng};
use rsa::pkcs1v15::SigningKey as Pkcs1v15SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::pss::SigningKey as PssSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{HsmError, HsmResult};
use crate::{HsmSession, KeyClass, KeyHandle, SignAlgorithm};

type HmacSha256 = Hmac<Sha256>;

/// An RSA key big enough for the signing/wrapping this adapter performs;
/// keeping it small (1024 bits would be unrealistic for production, but
/// this is a dev-only soft token) keeps test key generation fast.
const SOFT_RSA_BITS: usize = 2048;

enum StoredKey {
    Secret(Vec<u8>),
    Rsa(Box<RsaPrivateKey>),
}

pub struct SoftHsmSession {
    keys: HashMap<(KeyClass, String), (KeyHandle, StoredKey)>,
    next_handle: u64,
}

impl Default for SoftHsmSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftHsmSession {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            next_handle: 1,
        }
    }

    fn seed_for(class: KeyClass, label: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update([class as u8]);
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[0..8].try_into().unwrap())
    }

    fn materialize(class: KeyClass, label: &str) -> StoredKey {
        let seed = Self::seed_for(class, label);
        match class {
            KeyClass::SecretKey => {
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                let mut material = vec![0u8; 32];
                rng.fill_bytes(&mut material);
                StoredKey::Secret(material)
            }
            KeyClass::PrivateKey | KeyClass::PublicKey => {
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                let key = RsaPrivateKey::new(&mut rng, SOFT_RSA_BITS)
                    .expect("soft HSM RSA key generation");
                StoredKey::Rsa(Box::new(key))
            }
        }
    }

    fn entry(&mut self, class: KeyClass, label: &str) -> &mut (KeyHandle, StoredKey) {
        let key = (class, label.to_string());
        if !self.keys.contains_key(&key) {
            let handle = KeyHandle(self.next_handle);
            self.next_handle += 1;
            let stored = Self::materialize(class, label);
            self.keys.insert(key.clone(), (handle, stored));
        }
        self.keys.get_mut(&key).expect("just inserted")
    }

    fn secret_bytes(&self, key: KeyHandle) -> HsmResult<Vec<u8>> {
        self.keys
            .values()
            .find(|(h, _)| *h == key)
            .and_then(|(_, stored)| match stored {
                StoredKey::Secret(bytes) => Some(bytes.clone()),
                StoredKey::Rsa(_) => None,
            })
            .ok_or_else(|| HsmError::Fatal(format!("{key} is not a secret key")))
    }

    fn rsa_private(&self, key: KeyHandle) -> HsmResult<&RsaPrivateKey> {
        self.keys
            .values()
            .find(|(h, _)| *h == key)
            .and_then(|(_, stored)| match stored {
                StoredKey::Rsa(k) => Some(k.as_ref()),
                StoredKey::Secret(_) => None,
            })
            .ok_or_else(|| HsmError::Fatal(format!("{key} is not an RSA key")))
    }
}

impl HsmSession for SoftHsmSession {
    fn find_key(&mut self, class: KeyClass, label: &str) -> HsmResult<KeyHandle> {
        Ok(self.entry(class, label).0)
    }

    fn sign(&mut self, key: KeyHandle, alg: SignAlgorithm, msg: &[u8]) -> HsmResult<Vec<u8>> {
        let private = self.rsa_private(key)?;
        match alg {
            SignAlgorithm::Sha256RsaPkcs1v15 => {
                let signing_key = Pkcs1v15SigningKey::<Sha256>::new(private.clone());
                Ok(signing_key.sign(msg).to_vec())
            }
            SignAlgorithm::Sha256WithRsaPss => {
                let signing_key = PssSigningKey::<Sha256>::new(private.clone());
                let mut rng = rand::thread_rng();
                Ok(signing_key.sign_with_rng(&mut rng, msg).to_vec())
            }
        }
    }

    fn kdf_derive(
        &mut self,
        key: KeyHandle,
        salt: &[u8],
        diversifier: &[u8],
        out_len: usize,
    ) -> HsmResult<Vec<u8>> {
        let mut secret = self.secret_bytes(key)?;
        let mut out = Vec::with_capacity(out_len);
        let mut counter: u32 = 0;
        while out.len() < out_len {
            let mut mac = HmacSha256::new_from_slice(&secret)
                .map_err(|e| HsmError::Fatal(format!("HMAC init: {e}")))?;
            mac.update(salt);
            mac.update(diversifier);
            mac.update(&counter.to_be_bytes());
            out.extend_from_slice(&mac.finalize().into_bytes());
            counter += 1;
        }
        secret.zeroize();
        out.truncate(out_len);
        Ok(out)
    }

    fn generate_random(&mut self, n: usize) -> HsmResult<Vec<u8>> {
        let mut out = vec![0u8; n];
        rand::thread_rng().fill_bytes(&mut out);
        Ok(out)
    }

    fn unwrap_seed(&mut self, key: KeyHandle, blob: &[u8]) -> HsmResult<Vec<u8>> {
        let private = self.rsa_private(key)?;
        private
            .decrypt(Oaep::new::<Sha256>(), blob)
            .map_err(|e| HsmError::Fatal(format!("seed unwrap failed: {e}")))
    }

    fn get_public_key_der(&mut self, key: KeyHandle) -> HsmResult<Vec<u8>> {
        let private = self.rsa_private(key)?;
        let public = RsaPublicKey::from(private);
        public
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| HsmError::Fatal(format!("public key encode failed: {e}")))
    }

    fn wrap_seed(&mut self, key: KeyHandle, seed: &[u8]) -> HsmResult<Vec<u8>> {
        let private = self.rsa_private(key)?;
        let public = RsaPublicKey::from(private);
        let mut rng = rand::thread_rng();
        public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), seed)
            .map_err(|e| HsmError::Fatal(format!("seed wrap failed: {e}")))
    }

    fn get_stored_token(&mut self, label: &str) -> HsmResult<Vec<u8>> {
        let handle = self.entry(KeyClass::SecretKey, label).0;
        self.secret_bytes(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_for_a_fixed_key_and_input() {
        let mut session = SoftHsmSession::new();
        let key = session.find_key(KeyClass::SecretKey, "low_security").unwrap();
        let a = session.kdf_derive(key, b"salt", &[0x01], 16).unwrap();
        let b = session.kdf_derive(key, b"salt", &[0x01], 16).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn kdf_differs_across_diversifiers() {
        let mut session = SoftHsmSession::new();
        let key = session.find_key(KeyClass::SecretKey, "low_security").unwrap();
        let a = session.kdf_derive(key, b"salt", &[0x01], 16).unwrap();
        let b = session.kdf_derive(key, b"salt", &[0x02], 16).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn random_outputs_differ_across_calls() {
        let mut session = SoftHsmSession::new();
        let a = session.generate_random(16).unwrap();
        let b = session.generate_random(16).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn stored_token_is_stable_across_calls() {
        let mut session = SoftHsmSession::new();
        let a = session.get_stored_token("owner_token").unwrap();
        let b = session.get_stored_token("owner_token").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn find_key_is_idempotent_per_session() {
        let mut session = SoftHsmSession::new();
        let a = session.find_key(KeyClass::SecretKey, "keygen").unwrap();
        let b = session.find_key(KeyClass::SecretKey, "keygen").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_and_public_key_roundtrip_is_verifiable() {
        use rsa::pkcs1v15::VerifyingKey;
        use rsa::signature::Verifier;

        let mut session = SoftHsmSession::new();
        let key = session.find_key(KeyClass::PrivateKey, "ca_key").unwrap();
        let sig = session
            .sign(key, SignAlgorithm::Sha256RsaPkcs1v15, b"tbs-bytes")
            .unwrap();
        let private = session.rsa_private(key).unwrap().clone();
        let verifying_key = VerifyingKey::<Sha256>::new(RsaPublicKey::from(&private));
        let signature = rsa::pkcs1v15::Signature::try_from(sig.as_slice()).unwrap();
        assert!(verifying_key.verify(b"tbs-bytes", &signature).is_ok());
    }
}
