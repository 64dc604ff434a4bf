//! Tracker registry
//!
//! Owns every in-flight reconciliation, keyed by idempotency key. A write is
//! submitted and polled on a spawned task; callers observe progress through a
//! [`TrackerHandle`]. Trackers live until released, so a UI can unmount and
//! remount without losing a pending write.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{PollConfig, SdkConfig};
use crate::error::{Result, SdkError};
use crate::idempotency::IdempotencyKey;
use crate::store::EntityStore;
use crate::submit::{WriteRequest, WriteSubmitter};
use crate::tracker::{ReconcileStatus, ReconciliationRecord, ReconciliationTracker, TrackerFailure};

struct TrackedWrite {
    tracker: Arc<ReconciliationTracker>,
    request: WriteRequest,
}

/// Observer for one tracked write
#[derive(Clone)]
pub struct TrackerHandle {
    tracker: Arc<ReconciliationTracker>,
}

impl TrackerHandle {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.tracker.idempotency_key()
    }

    pub fn status(&self) -> ReconcileStatus {
        self.tracker.status()
    }

    pub fn snapshot(&self) -> ReconciliationRecord {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationRecord> {
        self.tracker.subscribe()
    }

    /// Wait until the write is indexed or has failed
    pub async fn wait(&self) -> Result<ReconciliationRecord> {
        self.tracker.wait().await
    }

    /// Stop polling without releasing the tracker
    pub fn cancel(&self) {
        self.tracker.cancel();
    }
}

/// Submits writes and reconciles them against the index
pub struct Reconciler {
    store: Arc<dyn EntityStore>,
    submitter: Arc<WriteSubmitter>,
    poll: PollConfig,
    clock: Arc<dyn Clock>,
    writes: DashMap<IdempotencyKey, TrackedWrite>,
}

impl Reconciler {
    /// Build from explicit configuration
    pub fn new(store: Arc<dyn EntityStore>, config: SdkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let submitter = Arc::new(WriteSubmitter::new(
            Arc::clone(&store),
            config.submit,
            Arc::clone(&clock),
        ));
        Ok(Self {
            store,
            submitter,
            poll: config.poll,
            clock,
            writes: DashMap::new(),
        })
    }

    /// Build with the system clock
    pub fn with_system_clock(store: Arc<dyn EntityStore>, config: SdkConfig) -> Result<Self> {
        Self::new(store, config, Arc::new(SystemClock))
    }

    /// Submit a write and start reconciling it.
    ///
    /// Invalid requests fail here without reaching the store. A request whose
    /// idempotency key already has a live tracker gets that tracker's handle
    /// and no second write. Must be called within a tokio runtime.
    pub fn track_write(&self, request: WriteRequest) -> Result<TrackerHandle> {
        self.submitter.validate(&request)?;

        let key = request.idempotency_key.clone();
        let tracker = Arc::new(ReconciliationTracker::new(
            key.clone(),
            request.logical_key.clone(),
            Arc::clone(&self.store),
            self.poll.clone(),
            Arc::clone(&self.clock),
        ));
        let tracked = TrackedWrite {
            tracker: Arc::clone(&tracker),
            request: request.clone(),
        };

        // Check and insert under one shard lock
        match self.writes.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                let live = &existing.get().tracker;
                if !live.is_cancelled() && live.status() != ReconcileStatus::Error {
                    debug!(idempotency_key = %key, "Write already tracked");
                    return Ok(TrackerHandle {
                        tracker: Arc::clone(live),
                    });
                }
                existing.insert(tracked).tracker.cancel();
            }
            Entry::Vacant(slot) => {
                slot.insert(tracked);
            }
        }

        info!(idempotency_key = %key, record = %request.logical_key, "Tracking write");
        self.spawn_drive(Arc::clone(&tracker), request);
        Ok(TrackerHandle { tracker })
    }

    /// Resubmit a failed write with the same request and idempotency key
    pub fn retry(&self, key: &IdempotencyKey) -> Result<TrackerHandle> {
        let (tracker, request) = {
            let entry = self
                .writes
                .get(key)
                .ok_or_else(|| SdkError::Validation(format!("no tracked write for {}", key)))?;
            (Arc::clone(&entry.tracker), entry.request.clone())
        };

        if tracker.is_cancelled() {
            return Err(SdkError::Validation(format!("write {} was cancelled", key)));
        }
        if !tracker.reset_for_retry() {
            return Err(SdkError::Validation(format!(
                "write {} is {}, only failed writes can be retried",
                key,
                tracker.status()
            )));
        }

        info!(idempotency_key = %key, "Retrying write");
        self.spawn_drive(Arc::clone(&tracker), request);
        Ok(TrackerHandle { tracker })
    }

    /// Handle for a tracked write
    pub fn get(&self, key: &IdempotencyKey) -> Option<TrackerHandle> {
        self.writes.get(key).map(|entry| TrackerHandle {
            tracker: Arc::clone(&entry.tracker),
        })
    }

    /// Stop and forget a tracked write
    pub fn release(&self, key: &IdempotencyKey) -> bool {
        match self.writes.remove(key) {
            Some((_, write)) => {
                write.tracker.cancel();
                debug!(idempotency_key = %key, "Released tracker");
                true
            }
            None => false,
        }
    }

    /// Release every indexed write, returning how many were removed
    pub fn prune_indexed(&self) -> usize {
        let before = self.writes.len();
        self.writes
            .retain(|_, write| write.tracker.status() != ReconcileStatus::Indexed);
        before - self.writes.len()
    }

    /// Number of tracked writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Cancel and release every tracked write
    pub fn shutdown(&self) {
        for entry in self.writes.iter() {
            entry.tracker.cancel();
        }
        self.writes.clear();
    }

    fn spawn_drive(&self, tracker: Arc<ReconciliationTracker>, request: WriteRequest) {
        let submitter = Arc::clone(&self.submitter);
        tokio::spawn(async move {
            // The write itself is never abandoned; cancellation only stops polling
            match submitter.submit(&request).await {
                Ok(submission) => {
                    tracker.mark_submitted(&submission);
                }
                Err(err) => {
                    tracker.mark_failed(TrackerFailure::from(&err));
                    return;
                }
            }
            // Outcome is published through the tracker's watch channel
            let _ = tracker.run().await;
        });
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::LogicalKey;
    use crate::store::{MemoryStore, WriteScript};
    use std::time::Duration;
    use tokio::sync::Barrier;

    fn config() -> SdkConfig {
        let mut config = SdkConfig::default();
        config.poll = PollConfig {
            interval_ms: 100,
            max_duration_ms: 10_000,
            max_attempts: 5,
        };
        config.submit.record_tx_reference = false;
        config
    }

    fn reconciler(store: Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(store, config(), Arc::new(ManualClock::new(1_700_000_000_000))).unwrap()
    }

    fn profile_write(key: &str) -> WriteRequest {
        WriteRequest::new(
            LogicalKey::profile("0xabc").unwrap(),
            IdempotencyKey::from_raw(key).unwrap(),
        )
        .with_attribute("displayName", "Ada")
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_write_to_indexed() {
        let store = Arc::new(MemoryStore::with_index_lag(2));
        let reconciler = reconciler(store.clone());

        let handle = reconciler.track_write(profile_write("k1")).unwrap();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.status, ReconcileStatus::Indexed);
        assert_eq!(record.attempts, 3);
        assert_eq!(store.write_count(), 1);

        assert_eq!(reconciler.prune_indexed(), 1);
        assert!(reconciler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_key_reuses_tracker() {
        let store = Arc::new(MemoryStore::with_index_lag(2));
        let reconciler = reconciler(store.clone());

        let first = reconciler.track_write(profile_write("k1")).unwrap();
        let second = reconciler.track_write(profile_write("k1")).unwrap();
        second.wait().await.unwrap();
        assert_eq!(first.status(), ReconcileStatus::Indexed);
        assert_eq!(store.write_count(), 1);
        assert_eq!(reconciler.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_never_tracked() {
        let store = Arc::new(MemoryStore::immediate());
        let reconciler = reconciler(store.clone());

        let request = profile_write("k1").with_attribute("type", "skill");
        assert!(matches!(
            reconciler.track_write(request),
            Err(SdkError::Validation(_))
        ));
        assert!(reconciler.is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_fatal_write() {
        let store = Arc::new(MemoryStore::immediate());
        store.script([WriteScript::Reject("insufficient funds".into())]).await;
        let reconciler = reconciler(store.clone());

        let handle = reconciler.track_write(profile_write("k1")).unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SdkError::FatalWrite(_)));
        assert!(err.is_retryable());

        let key = handle.idempotency_key();
        let retried = reconciler.retry(&key).unwrap();
        let record = retried.wait().await.unwrap();
        assert_eq!(record.status, ReconcileStatus::Indexed);
        assert_eq!(store.write_count(), 2);

        // Only failed writes can be retried
        assert!(reconciler.retry(&key).is_err());
        assert!(reconciler.retry(&IdempotencyKey::from_raw("unknown").unwrap()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_stops_polling() {
        let store = Arc::new(MemoryStore::with_index_lag(1_000));
        let reconciler = reconciler(store.clone());

        let handle = reconciler.track_write(profile_write("k1")).unwrap();
        let mut updates = handle.subscribe();
        updates
            .wait_for(|record| record.attempts >= 2)
            .await
            .unwrap();

        assert!(reconciler.release(&handle.idempotency_key()));
        assert!(!reconciler.release(&handle.idempotency_key()));
        let polled = store.query_count();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.query_count(), polled);
        assert_eq!(handle.status(), ReconcileStatus::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_return_on_release_and_drop() {
        let store = Arc::new(MemoryStore::with_index_lag(1_000));
        let reconciler = reconciler(store.clone());

        let released = reconciler.track_write(profile_write("k1")).unwrap();
        let dropped = reconciler.track_write(profile_write("k2")).unwrap();
        let waiters: Vec<_> = [released.clone(), dropped.clone()]
            .into_iter()
            .map(|handle| tokio::spawn(async move { handle.wait().await }))
            .collect();

        tokio::time::sleep(Duration::from_millis(350)).await;
        reconciler.release(&released.idempotency_key());
        drop(reconciler);

        for waiter in waiters {
            let record = tokio::time::timeout(Duration::from_secs(3600), waiter)
                .await
                .expect("wait did not return after teardown")
                .unwrap()
                .unwrap();
            assert_eq!(record.status, ReconcileStatus::Submitted);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_track_write_creates_one_tracker() {
        let store = Arc::new(MemoryStore::immediate());
        let reconciler = Arc::new(reconciler(store.clone()));
        let start = Arc::new(Barrier::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    reconciler.track_write(profile_write("k1")).unwrap()
                })
            })
            .collect();
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handle.tracker, &handles[0].tracker));
        }
        assert_eq!(handles[0].wait().await.unwrap().status, ReconcileStatus::Indexed);
        assert_eq!(store.write_count(), 1);
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = config();
        config.poll.max_attempts = 0;
        assert!(Reconciler::new(
            Arc::new(MemoryStore::immediate()),
            config,
            Arc::new(ManualClock::new(0))
        )
        .is_err());
    }
}
