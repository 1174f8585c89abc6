use super::backend::{HsmBackend, KeyHandle};
use super::errors::{HsmError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Default system-wide cap on live HSM sessions
pub const HSM_MAX_SESSIONS: usize = 10;

/// One attached cryptographic module.
///
/// Stays alive through the Arcs held by in-flight sessions even after
/// detach; sessions observe the detached flag and fail their next operation
/// instead of touching a logged-out module.
pub struct HsmModule {
    name: String,
    path: String,
    backend: Arc<dyn HsmBackend>,
    detached: AtomicBool,
}

impl HsmModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.detached.load(Ordering::SeqCst) {
            Err(HsmError::Detached(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

/// Bounded pool of authenticated sessions across all attached modules.
///
/// Hides multi-module attachment behind one sign/lookup/random surface.
/// Session acquisition is capped system-wide; workers block at the cap and
/// release their permit as soon as the sign operation completes.
pub struct HsmPool {
    modules: DashMap<String, Arc<HsmModule>>,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
}

impl HsmPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            modules: DashMap::new(),
            sessions: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    /// Attach and authenticate one module under a repository name.
    ///
    /// Idempotent per name: re-attaching an already attached repository
    /// returns the existing handle without logging in again.
    pub async fn attach(
        &self,
        name: &str,
        path: &str,
        pin: &str,
        backend: Arc<dyn HsmBackend>,
    ) -> Result<Arc<HsmModule>> {
        if let Some(existing) = self.modules.get(name) {
            return Ok(existing.value().clone());
        }

        backend.login(pin).await?;
        let module = Arc::new(HsmModule {
            name: name.to_string(),
            path: path.to_string(),
            backend,
            detached: AtomicBool::new(false),
        });
        info!(repository = name, path, "HSM repository attached");

        // A concurrent attach for the same name may have won the race;
        // keep whichever module landed first.
        Ok(self
            .modules
            .entry(name.to_string())
            .or_insert(module)
            .value()
            .clone())
    }

    /// Log out and release a module.
    ///
    /// Safe while workers hold sessions from it: those sessions observe a
    /// `Detached` sign error rather than crashing.
    pub fn detach(&self, name: &str) -> Result<()> {
        let (_, module) = self
            .modules
            .remove(name)
            .ok_or_else(|| HsmError::NotAttached(name.to_string()))?;
        module.detached.store(true, Ordering::SeqCst);
        info!(repository = name, "HSM repository detached");
        Ok(())
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Acquire a session bound to one repository, waiting at the cap
    pub async fn acquire(&self, repository: &str) -> Result<Session> {
        let module = self.module(repository)?;
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HsmError::Exhausted(self.max_sessions))?;
        Ok(Session {
            module,
            _permit: permit,
        })
    }

    /// Non-blocking acquire; fails with `Exhausted` at the cap
    pub fn try_acquire(&self, repository: &str) -> Result<Session> {
        let module = self.module(repository)?;
        let permit = self
            .sessions
            .clone()
            .try_acquire_owned()
            .map_err(|_| HsmError::Exhausted(self.max_sessions))?;
        Ok(Session {
            module,
            _permit: permit,
        })
    }

    /// Look up a key pair by locator across all attached modules
    pub async fn find_key(&self, locator: &Uuid) -> Result<KeyHandle> {
        for entry in self.modules.iter() {
            if entry.ensure_attached().is_err() {
                continue;
            }
            if let Some(handle) = entry.backend.find_key(locator).await {
                return Ok(handle);
            }
        }
        Err(HsmError::KeyNotFound(*locator))
    }

    /// Generate a key pair in the named repository.
    ///
    /// The fresh UUID assigned here is the key's external identifier; it,
    /// not any session-local handle, is what persists across restarts.
    pub async fn generate_key(&self, repository: &str, bits: u32) -> Result<KeyHandle> {
        let module = self.module(repository)?;
        let locator = Uuid::new_v4();
        module
            .backend
            .generate_key(locator, bits)
            .await
            .map_err(|e| HsmError::Generation {
                name: repository.to_string(),
                reason: e.to_string(),
            })?;
        info!(repository, %locator, bits, "key pair generated");
        Ok(KeyHandle {
            locator,
            repository: repository.to_string(),
            bits,
        })
    }

    /// All key pairs across all attached modules
    pub async fn list_keys(&self) -> Vec<KeyHandle> {
        let mut keys = Vec::new();
        for entry in self.modules.iter() {
            if entry.ensure_attached().is_ok() {
                keys.extend(entry.backend.list_keys().await);
            }
        }
        keys
    }

    /// Random bytes from any attached module
    pub async fn random(&self, len: usize) -> Result<Vec<u8>> {
        for entry in self.modules.iter() {
            if entry.ensure_attached().is_err() {
                continue;
            }
            match entry.backend.random(len).await {
                Ok(buf) => return Ok(buf),
                Err(e) => warn!(repository = entry.name(), "random source failed: {}", e),
            }
        }
        Err(HsmError::Random("no attached repository".to_string()))
    }

    pub async fn random32(&self) -> Result<u32> {
        let buf = self.random(4).await?;
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    pub async fn random64(&self) -> Result<u64> {
        let buf = self.random(8).await?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    fn module(&self, repository: &str) -> Result<Arc<HsmModule>> {
        self.modules
            .get(repository)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HsmError::NotAttached(repository.to_string()))
    }
}

impl Default for HsmPool {
    fn default() -> Self {
        Self::new(HSM_MAX_SESSIONS)
    }
}

/// One authenticated session, held for the duration of a sign operation.
///
/// Dropping the session returns its permit to the pool.
pub struct Session {
    module: Arc<HsmModule>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn repository(&self) -> &str {
        self.module.name()
    }

    pub async fn sign(&self, key: &KeyHandle, data: &[u8]) -> Result<Vec<u8>> {
        self.module.ensure_attached()?;
        self.module.backend.sign(key, data).await
    }
}
