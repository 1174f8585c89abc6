use super::backend::{HsmBackend, KeyHandle};
use super::errors::{HsmError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use ring::hmac;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Software key store emulating an HSM repository.
///
/// Keys are random HMAC secrets held in memory and signing is HMAC-SHA256
/// over the canonical RRset bytes. Used for local runs and tests; real
/// deployments put a PKCS#11 module behind [`HsmBackend`] instead.
pub struct SoftHsm {
    repository: String,
    pin: String,
    keys: DashMap<Uuid, SoftKey>,
    failing: AtomicBool,
}

struct SoftKey {
    secret: hmac::Key,
    bits: u32,
}

impl SoftHsm {
    pub fn new(repository: &str, pin: &str) -> Self {
        Self {
            repository: repository.to_string(),
            pin: pin.to_string(),
            keys: DashMap::new(),
            failing: AtomicBool::new(false),
        }
    }

    /// Fault injection: make every subsequent sign call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn handle(&self, locator: Uuid, bits: u32) -> KeyHandle {
        KeyHandle {
            locator,
            repository: self.repository.clone(),
            bits,
        }
    }
}

#[async_trait]
impl HsmBackend for SoftHsm {
    async fn login(&self, pin: &str) -> Result<()> {
        if pin == self.pin {
            Ok(())
        } else {
            Err(HsmError::Attach {
                name: self.repository.clone(),
                reason: "invalid PIN".to_string(),
            })
        }
    }

    async fn sign(&self, key: &KeyHandle, data: &[u8]) -> Result<Vec<u8>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HsmError::Sign {
                locator: key.locator,
                reason: "module reported CKR_DEVICE_ERROR".to_string(),
            });
        }

        let entry = self
            .keys
            .get(&key.locator)
            .ok_or(HsmError::KeyNotFound(key.locator))?;
        Ok(hmac::sign(&entry.secret, data).as_ref().to_vec())
    }

    async fn generate_key(&self, locator: Uuid, bits: u32) -> Result<()> {
        let mut material = vec![0u8; (bits as usize / 8).max(32)];
        rand::rng().fill_bytes(&mut material);

        let secret = hmac::Key::new(hmac::HMAC_SHA256, &material);
        self.keys.insert(locator, SoftKey { secret, bits });
        Ok(())
    }

    async fn find_key(&self, locator: &Uuid) -> Option<KeyHandle> {
        self.keys
            .get(locator)
            .map(|entry| self.handle(*locator, entry.bits))
    }

    async fn list_keys(&self) -> Vec<KeyHandle> {
        self.keys
            .iter()
            .map(|entry| self.handle(*entry.key(), entry.bits))
            .collect()
    }

    async fn random(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        rand::rng().fill_bytes(&mut buf);
        Ok(buf)
    }
}
