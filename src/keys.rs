use crate::records::RrType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// DNSKEY flags value for a zone-signing key
pub const FLAGS_ZSK: u16 = 256;
/// DNSKEY flags value for a key-signing key (SEP bit set)
pub const FLAGS_KSK: u16 = 257;

/// Role of a signing key within the zone's key set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// Key-signing key: signs only the DNSKEY RRset
    Ksk,
    /// Zone-signing key: signs all zone data except the DNSKEY RRset
    Zsk,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Ksk => write!(f, "KSK"),
            KeyRole::Zsk => write!(f, "ZSK"),
        }
    }
}

impl FromStr for KeyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KSK" => Ok(KeyRole::Ksk),
            "ZSK" => Ok(KeyRole::Zsk),
            other => Err(format!("Invalid key role: {}", other)),
        }
    }
}

/// One active signing key.
///
/// The locator is the key's stable external identifier; the private key
/// material never leaves the HSM repository named here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub locator: Uuid,
    pub flags: u16,
    pub role: KeyRole,
    pub repository: String,
}

impl SigningKey {
    pub fn new(locator: Uuid, role: KeyRole, repository: &str) -> Self {
        let flags = match role {
            KeyRole::Ksk => FLAGS_KSK,
            KeyRole::Zsk => FLAGS_ZSK,
        };
        Self {
            locator,
            flags,
            role,
            repository: repository.to_string(),
        }
    }

    /// Whether this key signs RRsets of the given type
    pub fn applies_to(&self, rtype: RrType) -> bool {
        match self.role {
            KeyRole::Ksk => rtype == RrType::Dnskey,
            KeyRole::Zsk => rtype != RrType::Dnskey,
        }
    }
}

/// Ordered snapshot of the keys active for a zone.
///
/// Supplied by policy evaluation; the diff engine consults it to decide
/// which RRsets need (re)signing and which stale signatures to drop.
#[derive(Debug, Clone, Default)]
pub struct KeyList {
    keys: Vec<SigningKey>,
}

impl KeyList {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_locator(&self, locator: &Uuid) -> bool {
        self.keys.iter().any(|k| k.locator == *locator)
    }

    /// Keys that must sign an RRset of the given type, in list order
    pub fn applicable(&self, rtype: RrType) -> Vec<&SigningKey> {
        self.keys.iter().filter(|k| k.applies_to(rtype)).collect()
    }
}
