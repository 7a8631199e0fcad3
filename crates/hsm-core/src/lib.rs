//! A thin capability layer over a PKCS#11-like library.
//!
//! Keys are identified by label within a class and never leave the HSM;
//! the only operations exposed are the primitives the SPM needs: key
//! lookup, signing, key derivation, random generation and seed unwrap.
//! A [`HsmPool`] hands out exclusive, leased sessions so that no two
//! concurrent callers ever share a session handle.

pub mod error;
pub mod pool;
pub mod soft;

#[cfg(feature = "pkcs11")]
pub mod pkcs11_backend;

pub use error::{HsmError, HsmResult};
pub use pool::HsmPool;

use std::fmt;

/// The PKCS#11 object classes the adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    PublicKey,
    PrivateKey,
    SecretKey,
}

/// Opaque handle to a key inside a leased session. Never serialized or
/// returned across an RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle(pub u64);

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHandle({:#x})", self.0)
    }
}

/// Signing algorithm selector for [`HsmSession::sign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgorithm {
    Sha256RsaPkcs1v15,
    Sha256WithRsaPss,
}

/// One leased, authenticated PKCS#11-style session.
///
/// Implementations must never log key material and must be
/// deterministic in their signing/KDF outputs for a fixed `(key, input)`
/// pair.
pub trait HsmSession: Send {
    /// Resolve a key by `(class, label)`, consulting this session's
    /// lookup cache first.
    fn find_key(&mut self, class: KeyClass, label: &str) -> HsmResult<KeyHandle>;

    /// Sign `msg` with the private key at `key`.
    fn sign(&mut self, key: KeyHandle, alg: SignAlgorithm, msg: &[u8]) -> HsmResult<Vec<u8>>;

    /// Derive `out_len` bytes from the secret key at `key`, folding in
    /// `salt` and `diversifier`.
    fn kdf_derive(
        &mut self,
        key: KeyHandle,
        salt: &[u8],
        diversifier: &[u8],
        out_len: usize,
    ) -> HsmResult<Vec<u8>>;

    /// Fill `n` bytes of HSM-resident CSPRNG output.
    fn generate_random(&mut self, n: usize) -> HsmResult<Vec<u8>>;

    /// Unwrap an HSM-wrapped seed blob under `key`.
    fn unwrap_seed(&mut self, key: KeyHandle, blob: &[u8]) -> HsmResult<Vec<u8>>;

    /// Export the DER-encoded public half of an asymmetric key. The only
    /// key material ever allowed to leave the HSM (public keys only).
    fn get_public_key_der(&mut self, key: KeyHandle) -> HsmResult<Vec<u8>>;

    /// Wrap `seed` under the public wrapping key at `key` (used for
    /// `wrap_seed=true` token derivation responses).
    fn wrap_seed(&mut self, key: KeyHandle, seed: &[u8]) -> HsmResult<Vec<u8>>;

    /// Return a previously persisted token blob stored under `label`.
    /// Unlike `sign`/`kdf_derive`, this data object's raw bytes are
    /// allowed to leave the HSM — it is a stored value, not private key
    /// material.
    fn get_stored_token(&mut self, label: &str) -> HsmResult<Vec<u8>>;
}
