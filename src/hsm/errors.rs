use thiserror::Error;
use uuid::Uuid;

/// HSM attachment and signing errors.
///
/// Module- and key-scoped failures stay scoped: a sign failure fails only
/// the RRset+key that hit it, and one broken module never makes the other
/// attached modules unusable.
#[derive(Error, Debug, Clone)]
pub enum HsmError {
    #[error("repository '{name}' failed to attach: {reason}")]
    Attach { name: String, reason: String },

    #[error("repository '{0}' is not attached")]
    NotAttached(String),

    #[error("repository '{0}' was detached")]
    Detached(String),

    #[error("all {0} HSM sessions are in use")]
    Exhausted(usize),

    #[error("key {0} not found in any attached repository")]
    KeyNotFound(Uuid),

    #[error("key generation failed in repository '{name}': {reason}")]
    Generation { name: String, reason: String },

    #[error("signing with key {locator} failed: {reason}")]
    Sign { locator: Uuid, reason: String },

    #[error("random generation failed: {0}")]
    Random(String),
}

pub type Result<T> = std::result::Result<T, HsmError>;
