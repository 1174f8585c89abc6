use super::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Opaque reference to a key pair resident in an HSM repository.
///
/// The locator UUID is the key's stable external identifier; it survives
/// process restarts and HSM reattachment, unlike any session-local handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub locator: Uuid,
    pub repository: String,
    pub bits: u32,
}

/// Narrow boundary to one cryptographic module.
///
/// A PKCS#11 implementation lives behind this trait; the engine only ever
/// sees key lookup, signing and randomness. All calls are synchronous at
/// the module and may fail independently per module.
#[async_trait]
pub trait HsmBackend: Send + Sync {
    /// Authenticate to the module; called once during attach
    async fn login(&self, pin: &str) -> Result<()>;

    /// Sign canonical RRset bytes with the key behind the handle
    async fn sign(&self, key: &KeyHandle, data: &[u8]) -> Result<Vec<u8>>;

    /// Create a fresh key pair stored under the given locator
    async fn generate_key(&self, locator: Uuid, bits: u32) -> Result<()>;

    /// Look up a key pair by locator
    async fn find_key(&self, locator: &Uuid) -> Option<KeyHandle>;

    /// All key pairs resident in this module
    async fn list_keys(&self) -> Vec<KeyHandle>;

    /// Fill a buffer with module-generated randomness
    async fn random(&self, len: usize) -> Result<Vec<u8>>;
}
