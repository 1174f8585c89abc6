use super::queue::SigningQueue;
use super::signer::{SigTiming, build_rrsig, reusable_rrsig};
use crate::hsm::{HsmError, HsmPool};
use crate::keys::KeyList;
use crate::records::Rrsig;
use crate::rrset::{RrsetKey, RrsetStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// One failed RRset+key signing attempt, reported in the pass summary
#[derive(Debug, Clone)]
pub struct SignFailure {
    pub rrset: RrsetKey,
    pub locator: Uuid,
    pub error: HsmError,
}

/// Aggregate signing counters shared by all workers of one pass
#[derive(Debug, Default)]
pub struct SignCounters {
    pub rrsets_signed: AtomicUsize,
    pub rrsets_failed: AtomicUsize,
    pub signatures_created: AtomicUsize,
    pub signatures_reused: AtomicUsize,
}

/// Everything a signing worker needs; cheap to clone per task
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<RrsetStore>,
    pub queue: Arc<SigningQueue>,
    pub hsm: Arc<HsmPool>,
    pub keys: Arc<KeyList>,
    pub timing: SigTiming,
    pub failures: Arc<Mutex<Vec<SignFailure>>>,
    pub counters: Arc<SignCounters>,
}

/// Fixed set of concurrent signing workers draining one shared queue.
///
/// Each worker loops: dequeue RRset, acquire an HSM session, produce one
/// signature per applicable key, attach the result under the RRset's lock.
/// Workers only contend on the queue and the bounded session pool; the
/// queue's single delivery guarantees no RRset is ever owned by two workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, ctx: WorkerContext) -> Self {
        let handles = (0..workers)
            .map(|id| {
                let ctx = ctx.clone();
                tokio::spawn(run_worker(id, ctx))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to observe queue closure and exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("signer worker panicked: {}", e);
            }
        }
    }
}

async fn run_worker(id: usize, ctx: WorkerContext) {
    debug!(worker = id, "signer worker started");
    while let Some(key) = ctx.queue.dequeue().await {
        sign_one(&ctx, key).await;
    }
    debug!(worker = id, "signer worker exiting");
}

/// Sign a single RRset with every applicable key.
///
/// The RRset snapshot is taken under a short read lock; the HSM round trips
/// happen without any lock held; the new signature set is staged under a
/// write lock only if every key succeeded, and goes live when the
/// coordinator commits the RRset. A partial failure leaves the previous
/// signature set untouched so the zone never ships a half-signed RRset.
async fn sign_one(ctx: &WorkerContext, key: RrsetKey) {
    let Some(rrset_arc) = ctx.store.get(&key) else {
        warn!(rrset = %key, "rrset vanished before signing");
        return;
    };

    let (canonical, existing, content_changed) = {
        let rrset = rrset_arc.read();
        if !rrset.needs_signing() {
            return;
        }
        (
            rrset.canonical_bytes(),
            rrset.signatures().to_vec(),
            rrset.add_count() > 0 || rrset.del_count() > 0,
        )
    };

    let now = Utc::now();
    let applicable = ctx.keys.applicable(key.rtype);
    let mut by_repository: BTreeMap<&str, Vec<&crate::keys::SigningKey>> = BTreeMap::new();
    for signing_key in applicable {
        by_repository
            .entry(signing_key.repository.as_str())
            .or_default()
            .push(signing_key);
    }

    let mut signatures: Vec<Rrsig> = Vec::new();
    let mut failures: Vec<SignFailure> = Vec::new();

    for (repository, repo_keys) in by_repository {
        // One session covers all keys of this repository; released as soon
        // as this scope ends.
        let session = match ctx.hsm.acquire(repository).await {
            Ok(session) => session,
            Err(e) => {
                for signing_key in repo_keys {
                    failures.push(SignFailure {
                        rrset: key.clone(),
                        locator: signing_key.locator,
                        error: e.clone(),
                    });
                }
                continue;
            }
        };

        for signing_key in repo_keys {
            if let Some(reused) =
                reusable_rrsig(&existing, signing_key, content_changed, now, &ctx.timing)
            {
                signatures.push(reused);
                ctx.counters.signatures_reused.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let handle = match ctx.hsm.find_key(&signing_key.locator).await {
                Ok(handle) => handle,
                Err(e) => {
                    failures.push(SignFailure {
                        rrset: key.clone(),
                        locator: signing_key.locator,
                        error: e,
                    });
                    continue;
                }
            };

            match session.sign(&handle, &canonical).await {
                Ok(bytes) => {
                    signatures.push(build_rrsig(signing_key, bytes, now, &ctx.timing));
                    ctx.counters.signatures_created.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failures.push(SignFailure {
                        rrset: key.clone(),
                        locator: signing_key.locator,
                        error: e,
                    });
                }
            }
        }
    }

    if failures.is_empty() {
        rrset_arc.write().stage_signatures(signatures);
        ctx.counters.rrsets_signed.fetch_add(1, Ordering::Relaxed);
    } else {
        for failure in &failures {
            warn!(
                rrset = %failure.rrset,
                locator = %failure.locator,
                "signing failed: {}",
                failure.error
            );
        }
        ctx.counters.rrsets_failed.fetch_add(1, Ordering::Relaxed);
        ctx.failures.lock().extend(failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsm::SoftHsm;
    use crate::keys::{KeyRole, SigningKey};
    use crate::records::{RecordData, RrType};

    async fn context(workers_keys: usize) -> (WorkerContext, Arc<SoftHsm>) {
        let hsm = Arc::new(HsmPool::new(4));
        let backend = Arc::new(SoftHsm::new("default", "1234"));
        hsm.attach("default", "softhsm.so", "1234", backend.clone())
            .await
            .unwrap();

        let mut keys = Vec::new();
        for _ in 0..workers_keys {
            let handle = hsm.generate_key("default", 2048).await.unwrap();
            keys.push(SigningKey::new(handle.locator, KeyRole::Zsk, "default"));
        }

        let ctx = WorkerContext {
            store: Arc::new(RrsetStore::new()),
            queue: Arc::new(SigningQueue::new(16)),
            hsm,
            keys: Arc::new(KeyList::new(keys)),
            timing: SigTiming::default(),
            failures: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(SignCounters::default()),
        };
        (ctx, backend)
    }

    fn stage(ctx: &WorkerContext, owner: &str) -> RrsetKey {
        let key = RrsetKey::new(owner, RrType::A);
        let rrset = ctx.store.get_or_create(&key);
        let mut guard = rrset.write();
        guard.diff(
            &[RecordData::new(owner, RrType::A, 3600, vec![192, 0, 2, 1])],
            &ctx.keys,
            Utc::now(),
            ctx.timing.refresh,
        );
        key
    }

    #[tokio::test]
    async fn test_workers_sign_enqueued_rrsets() {
        let (ctx, _) = context(2).await;
        let first = stage(&ctx, "a.example.com");
        let second = stage(&ctx, "b.example.com");

        ctx.queue.enqueue(first.clone()).await.unwrap();
        ctx.queue.enqueue(second.clone()).await.unwrap();
        let pool = WorkerPool::spawn(3, ctx.clone());
        ctx.queue.close();
        pool.join().await;

        for key in [first, second] {
            let rrset = ctx.store.get(&key).unwrap();
            let mut guard = rrset.write();
            assert_eq!(guard.staged_signatures().unwrap().len(), 2);
            assert!(!guard.needs_signing());
            // signatures go live once the coordinator commits
            guard.commit();
            assert_eq!(guard.rrsig_count(), 2);
        }
        assert_eq!(ctx.counters.rrsets_signed.load(Ordering::Relaxed), 2);
        assert_eq!(ctx.counters.signatures_created.load(Ordering::Relaxed), 4);
        assert!(ctx.failures.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sign_failure_preserves_previous_signatures() {
        let (ctx, backend) = context(1).await;
        let key = stage(&ctx, "a.example.com");

        backend.set_failing(true);
        ctx.queue.enqueue(key.clone()).await.unwrap();
        let pool = WorkerPool::spawn(1, ctx.clone());
        ctx.queue.close();
        pool.join().await;

        let rrset = ctx.store.get(&key).unwrap();
        let guard = rrset.read();
        assert_eq!(guard.rrsig_count(), 0);
        assert!(guard.needs_signing());
        let failures = ctx.failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, HsmError::Sign { .. }));
    }
}
