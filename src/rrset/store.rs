use super::RrSet;
use crate::records::RrType;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identity of an RRset within a zone
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrsetKey {
    pub owner: String,
    pub rtype: RrType,
}

impl RrsetKey {
    pub fn new(owner: &str, rtype: RrType) -> Self {
        Self {
            owner: crate::records::normalize_owner(owner),
            rtype,
        }
    }
}

impl fmt::Display for RrsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.owner, self.rtype)
    }
}

// Commit order: owner name first, then type code
impl Ord for RrsetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.owner
            .cmp(&other.owner)
            .then_with(|| self.rtype.cmp(&other.rtype))
    }
}

impl PartialOrd for RrsetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Arena of RRsets indexed by (owner, type).
///
/// RRsets are created lazily on first sight and persist across passes. Each
/// entry carries its own lock: the diff thread stages record changes and
/// signing workers attach signatures, but never to the same RRset at the
/// same time for the same field.
pub struct RrsetStore {
    sets: DashMap<RrsetKey, Arc<RwLock<RrSet>>>,
}

impl RrsetStore {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, key: &RrsetKey) -> Arc<RwLock<RrSet>> {
        self.sets
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(rrset = %key, "rrset created");
                Arc::new(RwLock::new(RrSet::new(&key.owner, key.rtype)))
            })
            .value()
            .clone()
    }

    pub fn get(&self, key: &RrsetKey) -> Option<Arc<RwLock<RrSet>>> {
        self.sets.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &RrsetKey) -> Option<Arc<RwLock<RrSet>>> {
        self.sets.remove(key).map(|(_, set)| {
            debug!(rrset = %key, "rrset purged");
            set
        })
    }

    /// Snapshot of all keys currently in the store
    pub fn keys(&self) -> Vec<RrsetKey> {
        self.sets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Default for RrsetStore {
    fn default() -> Self {
        Self::new()
    }
}
