use crate::backup::{BackupError, BackupWriter};
use crate::config::SignerConfig;
use crate::hsm::HsmPool;
use crate::keys::KeyList;
use crate::records::RecordData;
use crate::rrset::{RrsetKey, RrsetStore};
use crate::signing::{SignCounters, SignFailure, SigningQueue, WorkerContext, WorkerPool};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tracing::{debug, error, info};

/// Coordinator state for one signing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Diffing,
    Signing,
    Committing,
    Aborting,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassState::Idle => write!(f, "idle"),
            PassState::Diffing => write!(f, "diffing"),
            PassState::Signing => write!(f, "signing"),
            PassState::Committing => write!(f, "committing"),
            PassState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Coordinator-level failures; these abort the pass, unlike per-RRset
/// errors which only land in the failure list
#[derive(Error, Debug)]
pub enum PassError {
    #[error("cannot write backup for zone {zone}: {source}")]
    Backup {
        zone: String,
        #[source]
        source: BackupError,
    },

    #[error("signing queue closed before diffing finished")]
    QueueClosed,
}

/// Aggregate outcome of one signing pass.
///
/// A pass is a best-effort batch: it completes "with failures" rather than
/// aborting on per-RRset errors, and every failure is listed for
/// operational visibility.
#[derive(Debug, Default)]
pub struct PassReport {
    /// RRsets that received a fresh signature set
    pub signed: usize,
    /// RRsets diffed but needing no signing work
    pub unchanged: usize,
    /// RRsets whose signing failed
    pub failed: usize,
    /// RRsets whose staged changes were committed
    pub committed: usize,
    /// RRsets removed from the store after a full withdrawal
    pub purged: usize,
    pub signatures_created: usize,
    pub signatures_reused: usize,
    pub failures: Vec<SignFailure>,
}

/// Drives a full zone pass with commit/rollback semantics.
///
/// One pass walks `Idle → Diffing → Signing → Committing → Idle`, reaching
/// `Aborting` from `Diffing` or `Signing` on an unrecoverable error. Commit
/// is the atomicity boundary per RRset, not per pass: RRsets committed
/// before a late failure stay committed.
pub struct ZoneSigner {
    zone: String,
    store: Arc<RrsetStore>,
    hsm: Arc<HsmPool>,
    config: SignerConfig,
    state: Mutex<PassState>,
}

impl ZoneSigner {
    pub fn new(zone: &str, store: Arc<RrsetStore>, hsm: Arc<HsmPool>, config: SignerConfig) -> Self {
        Self {
            zone: crate::records::normalize_owner(zone),
            store,
            hsm,
            config,
            state: Mutex::new(PassState::Idle),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn state(&self) -> PassState {
        *self.state.lock()
    }

    pub fn store(&self) -> &Arc<RrsetStore> {
        &self.store
    }

    fn set_state(&self, state: PassState) {
        debug!(zone = %self.zone, %state, "pass state");
        *self.state.lock() = state;
    }

    /// Restore signed state from this zone's backup log, if one exists.
    ///
    /// Returns the number of RRsets restored; a missing backup is not an
    /// error, the first pass simply signs everything.
    pub fn recover(&self) -> Result<usize, BackupError> {
        let path = self.config.backup_file(&self.zone);
        if !path.exists() {
            return Ok(0);
        }
        crate::backup::BackupReader::load(&path, &self.store)
    }

    /// Run one full signing pass over the zone's records.
    ///
    /// The key list snapshot taken here is used for the whole pass. The
    /// incoming records are the zone's complete content: RRsets in the
    /// store that no record mentions are treated as withdrawn.
    pub async fn run_pass(
        &self,
        records: Vec<RecordData>,
        key_list: KeyList,
    ) -> Result<PassReport, PassError> {
        self.set_state(PassState::Diffing);
        let keys = Arc::new(key_list);
        let timing = self.config.sig_timing();
        let now = Utc::now();

        let queue = Arc::new(SigningQueue::new(self.config.queue_size));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(SignCounters::default());
        let workers = WorkerPool::spawn(
            self.config.worker_threads,
            WorkerContext {
                store: self.store.clone(),
                queue: queue.clone(),
                hsm: self.hsm.clone(),
                keys: keys.clone(),
                timing,
                failures: failures.clone(),
                counters: counters.clone(),
            },
        );

        let mut grouped: BTreeMap<RrsetKey, Vec<RecordData>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(RrsetKey::new(record.owner(), record.rtype()))
                .or_default()
                .push(record);
        }

        let mut tracked: BTreeSet<RrsetKey> = BTreeSet::new();
        let mut unchanged = 0;
        let mut enqueue_failed = false;

        for (key, rrset_records) in &grouped {
            let rrset = self.store.get_or_create(key);
            let needs_signing = rrset
                .write()
                .diff(rrset_records, &keys, now, timing.refresh);
            tracked.insert(key.clone());

            if needs_signing {
                if queue.enqueue(key.clone()).await.is_err() {
                    error!(zone = %self.zone, "signing queue rejected work, aborting pass");
                    enqueue_failed = true;
                    break;
                }
            } else {
                unchanged += 1;
            }
        }

        // RRsets that disappeared from the zone for this whole pass are
        // withdrawn; they commit to empty and get purged below.
        for key in self.store.keys() {
            if !tracked.contains(&key) {
                if let Some(rrset) = self.store.get(&key) {
                    rrset.write().wipe();
                }
                tracked.insert(key);
            }
        }

        self.set_state(PassState::Signing);
        queue.close();
        workers.join().await;

        if enqueue_failed {
            self.abort(tracked.iter());
            return Err(PassError::QueueClosed);
        }

        self.set_state(PassState::Committing);
        let failures: Vec<SignFailure> = std::mem::take(&mut *failures.lock());
        let failed_keys: BTreeSet<RrsetKey> =
            failures.iter().map(|f| f.rrset.clone()).collect();

        let backup_path = self.config.backup_file(&self.zone);
        if let Some(parent) = backup_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.abort(tracked.iter());
                return Err(PassError::Backup {
                    zone: self.zone.clone(),
                    source: e.into(),
                });
            }
        }
        let mut backup = match BackupWriter::create(&backup_path) {
            Ok(writer) => writer,
            Err(e) => {
                self.abort(tracked.iter());
                return Err(PassError::Backup {
                    zone: self.zone.clone(),
                    source: e,
                });
            }
        };

        let mut committed = 0;
        let mut purged = 0;

        // Stable (owner, type) order: a crash mid-commit leaves a
        // deterministic, resumable partial state.
        for (idx, key) in tracked.iter().enumerate() {
            let Some(rrset_arc) = self.store.get(key) else {
                continue;
            };
            let mut rrset = rrset_arc.write();

            let sign_failed = failed_keys.contains(key);
            if sign_failed {
                // signing failed: keep the previous committed state and
                // the previous signature set, retry next pass
                rrset.rollback();
            }

            // durable record precedes the in-memory mutation; rolled-back
            // RRsets still carry their prior state into the new log
            if let Err(e) = backup.write_rrset(&rrset) {
                drop(rrset);
                self.abort(tracked.iter().skip(idx));
                return Err(PassError::Backup {
                    zone: self.zone.clone(),
                    source: e,
                });
            }
            if sign_failed {
                continue;
            }

            let outcome = rrset.commit();
            committed += 1;
            if outcome.empty {
                drop(rrset);
                self.store.remove(key);
                purged += 1;
            }
        }

        if let Err(e) = backup.finish() {
            // commits already applied stay applied; only the backup is stale
            error!(zone = %self.zone, "backup seal failed after commit: {}", e);
            return Err(PassError::Backup {
                zone: self.zone.clone(),
                source: e,
            });
        }

        self.set_state(PassState::Idle);

        let report = PassReport {
            signed: counters.rrsets_signed.load(Ordering::Relaxed),
            unchanged,
            failed: failed_keys.len(),
            committed,
            purged,
            signatures_created: counters.signatures_created.load(Ordering::Relaxed),
            signatures_reused: counters.signatures_reused.load(Ordering::Relaxed),
            failures,
        };
        info!(
            zone = %self.zone,
            signed = report.signed,
            unchanged = report.unchanged,
            failed = report.failed,
            committed = report.committed,
            purged = report.purged,
            created = report.signatures_created,
            reused = report.signatures_reused,
            "signing pass complete"
        );
        Ok(report)
    }

    /// Roll back every RRset that has not committed yet
    fn abort<'a>(&self, keys: impl Iterator<Item = &'a RrsetKey>) {
        self.set_state(PassState::Aborting);
        for key in keys {
            if let Some(rrset) = self.store.get(key) {
                rrset.write().rollback();
            }
        }
        self.set_state(PassState::Idle);
    }
}
