//! Real PKCS#11 backend using the `cryptoki` crate.
//!
//! Behind the `pkcs11` feature so the workspace builds without a vendor
//! `.so` present; `OpenPool` below is the only entry point callers need,
//! mirroring the software HSM's shape so `spm`'s service code is
//! identical regardless of which backend is wired in at the composition
//! root.

use std::collections::HashMap;
use std::path::Path;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;

use crate::error::{HsmError, HsmResult};
use crate::{HsmSession, KeyClass, KeyHandle, SignAlgorithm};

fn map_err(context: &str, err: impl std::fmt::Display) -> HsmError {
    // cryptoki doesn't expose a typed error taxonomy; treat communication
    // failures as transient and everything else as fatal.
    let msg = format!("{context}: {err}");
    if msg.contains("CKR_DEVICE_ERROR") || msg.contains("CKR_SESSION_HANDLE_INVALID") {
        HsmError::Transient(msg)
    } else {
        HsmError::Fatal(msg)
    }
}

fn object_class(class: KeyClass) -> ObjectClass {
    match class {
        KeyClass::PublicKey => ObjectClass::PUBLIC_KEY,
        KeyClass::PrivateKey => ObjectClass::PRIVATE_KEY,
        KeyClass::SecretKey => ObjectClass::SECRET_KEY,
    }
}

pub struct Pkcs11Session {
    session: Session,
    handle_cache: HashMap<(KeyClass, String), ObjectHandle>,
    handles: HashMap<KeyHandle, ObjectHandle>,
    next_handle: u64,
}

impl Pkcs11Session {
    /// Open and log in one session against `slot`, using `pin`. One of
    /// these is created per pool slot by [`open_pool`].
    pub fn open(ctx: &Pkcs11, slot: Slot, pin: &str) -> HsmResult<Self> {
        let session = ctx
            .open_rw_session(slot)
            .map_err(|e| map_err("open session", e))?;
        let auth_pin = AuthPin::new(pin.to_string());
        session
            .login(UserType::User, Some(&auth_pin))
            .map_err(|_| HsmError::Auth)?;
        Ok(Self {
            session,
            handle_cache: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
        })
    }

    fn resolve(&mut self, handle: KeyHandle) -> HsmResult<ObjectHandle> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or_else(|| HsmError::Fatal(format!("{handle} not bound in this session")))
    }
}

/// Open a pool of PKCS#11 sessions against `slot`, logging each one in
/// with `pin`. Failure on any session aborts pool creation, as does any
/// label in `symmetric_keys`/`asymmetric_keys` failing to resolve on the
/// freshly-opened session — an unknown key label must fail pool
/// creation, not surface lazily the first time some later RPC reaches
/// for it.
pub fn open_pool(
    library_path: &Path,
    slot_id: u64,
    pin: &str,
    size: usize,
    symmetric_keys: &[String],
    asymmetric_keys: &[String],
) -> HsmResult<crate::HsmPool> {
    let ctx = Pkcs11::new(library_path).map_err(|e| map_err("load PKCS#11 library", e))?;
    ctx.initialize(CInitializeArgs::OsThreads)
        .map_err(|e| map_err("initialize PKCS#11", e))?;

    let slots = ctx
        .get_slots_with_token()
        .map_err(|e| map_err("enumerate slots", e))?;
    let slot = *slots
        .iter()
        .find(|s| u64::from(s.id()) == slot_id)
        .ok_or_else(|| HsmError::Fatal(format!("slot {slot_id} not present")))?;

    crate::HsmPool::open(size, |_| {
        let mut session = Pkcs11Session::open(&ctx, slot, pin)?;
        for label in symmetric_keys {
            session.find_key(KeyClass::SecretKey, label)?;
        }
        for label in asymmetric_keys {
            session.find_key(KeyClass::PrivateKey, label)?;
        }
        Ok(Box::new(session) as Box<dyn HsmSession>)
    })
}

impl HsmSession for Pkcs11Session {
    fn find_key(&mut self, class: KeyClass, label: &str) -> HsmResult<KeyHandle> {
        let cache_key = (class, label.to_string());
        if let Some(object) = self.handle_cache.get(&cache_key) {
            let handle = KeyHandle(self.next_handle);
            self.handles.insert(handle, *object);
            self.next_handle += 1;
            return Ok(handle);
        }

        let template = vec![
            Attribute::Class(object_class(class)),
            Attribute::Label(label.as_bytes().to_vec()),
        ];
        let found = self
            .session
            .find_objects(&template)
            .map_err(|e| map_err("find_objects", e))?;
        let object = found.into_iter().next().ok_or(HsmError::NotFound {
            class,
            label: label.to_string(),
        })?;

        self.handle_cache.insert(cache_key, object);
        let handle = KeyHandle(self.next_handle);
        self.handles.insert(handle, object);
        self.next_handle += 1;
        Ok(handle)
    }

    fn sign(&mut self, key: KeyHandle, alg: SignAlgorithm, msg: &[u8]) -> HsmResult<Vec<u8>> {
        let object = self.resolve(key)?;
        let mechanism = match alg {
            SignAlgorithm::Sha256RsaPkcs1v15 => Mechanism::Sha256RsaPkcs,
            SignAlgorithm::Sha256WithRsaPss => Mechanism::Sha256RsaPkcsPss(
                cryptoki::mechanism::rsa::PkcsPssParams {
                    hash_alg: cryptoki::mechanism::MechanismType::SHA256,
                    mgf: cryptoki::mechanism::rsa::PkcsMgfType::MGF1_SHA256,
                    s_len: 32,
                },
            ),
        };
        self.session
            .sign(&mechanism, object, msg)
            .map_err(|e| map_err("sign", e))
    }

    fn kdf_derive(
        &mut self,
        key: KeyHandle,
        salt: &[u8],
        diversifier: &[u8],
        out_len: usize,
    ) -> HsmResult<Vec<u8>> {
        // The HSM vendor's KDF mechanism varies; this adapter folds
        // salt/diversifier into an HMAC-SHA256 keyed by the HSM-resident
        // secret and asks the token to perform the HMAC itself so the
        // key never leaves it.
        let object = self.resolve(key)?;
        let mut out = Vec::with_capacity(out_len);
        let mut counter: u32 = 0;
        while out.len() < out_len {
            let mut msg = Vec::with_capacity(salt.len() + diversifier.len() + 4);
            msg.extend_from_slice(salt);
            msg.extend_from_slice(diversifier);
            msg.extend_from_slice(&counter.to_be_bytes());
            let chunk = self
                .session
                .sign(&Mechanism::Sha256Hmac, object, &msg)
                .map_err(|e| map_err("kdf_derive", e))?;
            out.extend_from_slice(&chunk);
            counter += 1;
        }
        out.truncate(out_len);
        Ok(out)
    }

    fn generate_random(&mut self, n: usize) -> HsmResult<Vec<u8>> {
        self.session
            .generate_random_vec(n as u32)
            .map_err(|e| map_err("generate_random", e))
    }

    fn unwrap_seed(&mut self, key: KeyHandle, blob: &[u8]) -> HsmResult<Vec<u8>> {
        let object = self.resolve(key)?;
        self.session
            .decrypt(&Mechanism::RsaPkcsOaep(Default::default()), object, blob)
            .map_err(|e| map_err("unwrap_seed", e))
    }

    fn get_public_key_der(&mut self, key: KeyHandle) -> HsmResult<Vec<u8>> {
        let object = self.resolve(key)?;
        let attrs = self
            .session
            .get_attributes(object, &[AttributeType::Value])
            .map_err(|e| map_err("get_public_key_der", e))?;
        attrs
            .into_iter()
            .find_map(|a| match a {
                Attribute::Value(bytes) => Some(bytes),
                _ => None,
            })
            .ok_or_else(|| HsmError::Fatal("no VALUE attribute on public key object".to_string()))
    }

    fn wrap_seed(&mut self, key: KeyHandle, seed: &[u8]) -> HsmResult<Vec<u8>> {
        let object = self.resolve(key)?;
        self.session
            .encrypt(&Mechanism::RsaPkcsOaep(Default::default()), object, seed)
            .map_err(|e| map_err("wrap_seed", e))
    }

    fn get_stored_token(&mut self, label: &str) -> HsmResult<Vec<u8>> {
        let handle = self.find_key(KeyClass::SecretKey, label)?;
        let object = self.resolve(handle)?;
        let attrs = self
            .session
            .get_attributes(object, &[AttributeType::Value])
            .map_err(|e| map_err("get_stored_token", e))?;
        attrs
            .into_iter()
            .find_map(|a| match a {
                Attribute::Value(bytes) => Some(bytes),
                _ => None,
            })
            .ok_or_else(|| HsmError::Fatal("no VALUE attribute on stored token object".to_string()))
    }
}
