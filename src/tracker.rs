//! Reconciliation tracker
//!
//! Follows one write attempt from the moment the UI initiates it until the
//! written entity is visible to queries:
//!
//! ```text
//! pending ──submit ok / receipt timeout──▶ submitted ──poll sees write──▶ indexed
//!    │                                        │
//!    └──────fatal write────▶ error ◀──poll ceiling reached──┘
//!                              │
//!                              └──user retry──▶ pending
//! ```
//!
//! Polling is fixed-interval and bounded by both an attempt count and a
//! wall-clock ceiling. At most one poll read is in flight per tracker, and
//! cancelling the tracker stops all further reads.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PollConfig;
use crate::entity::{self, Entity};
use crate::error::{Result, SdkError};
use crate::idempotency::IdempotencyKey;
use crate::record::LogicalKey;
use crate::resolve::CanonicalView;
use crate::store::EntityStore;
use crate::submit::Submission;

/// Reconciliation state of one write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStatus {
    /// Initiated, no response from the store yet
    Pending,
    /// Acknowledged by the store, not yet visible to queries
    Submitted,
    /// Visible to queries and reflected in the canonical record
    Indexed,
    /// Rejected, or not observed before the poll ceiling
    Error,
}

impl ReconcileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileStatus::Indexed | ReconcileStatus::Error)
    }
}

impl std::fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReconcileStatus::Pending => "pending",
            ReconcileStatus::Submitted => "submitted",
            ReconcileStatus::Indexed => "indexed",
            ReconcileStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a tracker ended in `error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerFailure {
    /// The store rejected the write
    FatalWrite { message: String },
    /// The write was not observed in time; it may still land
    PollTimeout { attempts: u32, elapsed_ms: u64 },
}

impl From<&SdkError> for TrackerFailure {
    fn from(err: &SdkError) -> Self {
        match err {
            SdkError::PollTimeout {
                attempts,
                elapsed_ms,
            } => TrackerFailure::PollTimeout {
                attempts: *attempts,
                elapsed_ms: *elapsed_ms,
            },
            SdkError::FatalWrite(message) => TrackerFailure::FatalWrite {
                message: message.clone(),
            },
            other => TrackerFailure::FatalWrite {
                message: other.to_string(),
            },
        }
    }
}

impl From<&TrackerFailure> for SdkError {
    fn from(failure: &TrackerFailure) -> Self {
        match failure {
            TrackerFailure::FatalWrite { message } => SdkError::FatalWrite(message.clone()),
            TrackerFailure::PollTimeout {
                attempts,
                elapsed_ms,
            } => SdkError::PollTimeout {
                attempts: *attempts,
                elapsed_ms: *elapsed_ms,
            },
        }
    }
}

/// In-memory record of one write attempt, as observed by a UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub idempotency_key: IdempotencyKey,
    pub status: ReconcileStatus,
    pub entity_key: Option<String>,
    pub tx_reference: Option<String>,
    /// `createdAt` of the written entity
    pub written_at_ms: Option<i64>,
    pub last_polled_at_ms: Option<i64>,
    pub attempts: u32,
    pub error: Option<TrackerFailure>,
}

impl ReconciliationRecord {
    fn new(idempotency_key: IdempotencyKey) -> Self {
        Self {
            idempotency_key,
            status: ReconcileStatus::Pending,
            entity_key: None,
            tx_reference: None,
            written_at_ms: None,
            last_polled_at_ms: None,
            attempts: 0,
            error: None,
        }
    }

    /// Whether `entity` is the entity this attempt wrote
    fn is_own_write(&self, entity: &Entity) -> bool {
        if self.entity_key.as_deref() == Some(entity.key.as_str()) {
            return true;
        }
        if self.tx_reference.is_some() && entity.tx_reference == self.tx_reference {
            return true;
        }
        entity.attribute(entity::IDEMPOTENCY_KEY) == Some(self.idempotency_key.as_str())
    }

    fn into_result(self) -> Result<ReconciliationRecord> {
        match &self.error {
            Some(failure) if self.status == ReconcileStatus::Error => Err(failure.into()),
            _ => Ok(self),
        }
    }
}

/// Tracks one write attempt through reconciliation
pub struct ReconciliationTracker {
    logical_key: LogicalKey,
    store: Arc<dyn EntityStore>,
    config: PollConfig,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ReconciliationRecord>,
    /// Held for the duration of a poll read
    poll_gate: Mutex<()>,
    cancel: CancellationToken,
}

impl ReconciliationTracker {
    /// Create a tracker in `pending`
    pub fn new(
        idempotency_key: IdempotencyKey,
        logical_key: LogicalKey,
        store: Arc<dyn EntityStore>,
        config: PollConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(ReconciliationRecord::new(idempotency_key));
        Self {
            logical_key,
            store,
            config,
            clock,
            state,
            poll_gate: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.state.borrow().idempotency_key.clone()
    }

    pub fn logical_key(&self) -> &LogicalKey {
        &self.logical_key
    }

    pub fn status(&self) -> ReconcileStatus {
        self.state.borrow().status
    }

    pub fn snapshot(&self) -> ReconciliationRecord {
        self.state.borrow().clone()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<ReconciliationRecord> {
        self.state.subscribe()
    }

    /// `pending → submitted`
    pub fn mark_submitted(&self, submission: &Submission) -> bool {
        let outcome = &submission.outcome;
        self.transition("submitted", |record| {
            if record.status != ReconcileStatus::Pending {
                return false;
            }
            record.status = ReconcileStatus::Submitted;
            record.entity_key = outcome.entity_key().map(str::to_string);
            record.tx_reference = outcome.tx_reference().map(str::to_string);
            record.written_at_ms = Some(submission.created_at_ms);
            true
        })
    }

    /// `pending | submitted → error`
    pub fn mark_failed(&self, failure: TrackerFailure) -> bool {
        self.transition("error", |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ReconcileStatus::Error;
            record.error = Some(failure);
            true
        })
    }

    /// `error → pending`, for a user-initiated retry
    pub fn reset_for_retry(&self) -> bool {
        self.transition("pending", |record| {
            if record.status != ReconcileStatus::Error {
                return false;
            }
            let idempotency_key = record.idempotency_key.clone();
            *record = ReconciliationRecord::new(idempotency_key);
            true
        })
    }

    fn transition(&self, to: &str, apply: impl FnOnce(&mut ReconciliationRecord) -> bool) -> bool {
        let changed = self.state.send_if_modified(apply);
        let record = self.state.borrow();
        if changed {
            debug!(
                idempotency_key = %record.idempotency_key,
                status = %record.status,
                "Reconciliation transition"
            );
        } else {
            debug!(
                idempotency_key = %record.idempotency_key,
                from = %record.status,
                to,
                "Ignoring illegal reconciliation transition"
            );
        }
        changed
    }

    /// Stop polling. No read is issued once this returns.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(idempotency_key = %self.state.borrow().idempotency_key, "Reconciliation cancelled");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Issue one poll read.
    ///
    /// Only acts in `submitted`. When another poll is already in flight no
    /// read is issued and the current status is returned.
    pub async fn poll_once(&self) -> ReconcileStatus {
        let Ok(_gate) = self.poll_gate.try_lock() else {
            debug!(idempotency_key = %self.state.borrow().idempotency_key, "Poll already in flight");
            return self.status();
        };
        if self.cancel.is_cancelled() {
            return self.status();
        }

        let expected = self.snapshot();
        if expected.status != ReconcileStatus::Submitted {
            return expected.status;
        }

        let filters = self.logical_key.filters();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.status(),
            result = self.store.query(&filters, false) => result,
        };
        let polled_at = self.clock.now_ms();

        match result {
            Ok(entities) => {
                let observed = self.observe(&expected, &entities);
                self.state.send_if_modified(|record| {
                    if record.status != ReconcileStatus::Submitted {
                        return false;
                    }
                    record.attempts += 1;
                    record.last_polled_at_ms = Some(polled_at);
                    if let Some(own) = &observed {
                        record.status = ReconcileStatus::Indexed;
                        if record.entity_key.is_none() {
                            record.entity_key = Some(own.key.clone());
                        }
                        if record.tx_reference.is_none() {
                            record.tx_reference = own.tx_reference.clone();
                        }
                    }
                    true
                });
                if observed.is_some() {
                    let record = self.state.borrow();
                    info!(
                        idempotency_key = %record.idempotency_key,
                        entity_key = ?record.entity_key,
                        attempts = record.attempts,
                        "Write indexed"
                    );
                }
            }
            Err(err) => {
                warn!(
                    idempotency_key = %expected.idempotency_key,
                    attempt = expected.attempts + 1,
                    error = %err,
                    "Poll read failed"
                );
                self.state.send_if_modified(|record| {
                    if record.status != ReconcileStatus::Submitted {
                        return false;
                    }
                    record.attempts += 1;
                    record.last_polled_at_ms = Some(polled_at);
                    true
                });
            }
        }
        self.status()
    }

    /// Find our write in a poll result, provided the canonical record reflects it
    fn observe(&self, expected: &ReconciliationRecord, entities: &[Entity]) -> Option<Entity> {
        let own = entities.iter().find(|e| expected.is_own_write(e))?;
        let view = CanonicalView::build(self.logical_key.kind(), entities);
        let canonical = view.get(&self.logical_key)?;

        let reflected = canonical.key == own.key
            || match (canonical.created_at_ms(), expected.written_at_ms) {
                (Some(canonical_at), Some(written_at)) => canonical_at >= written_at,
                (_, None) => true,
                (None, Some(_)) => false,
            };
        reflected.then(|| own.clone())
    }

    /// Poll at a fixed interval until indexed, failed, timed out or cancelled.
    ///
    /// Waits while the tracker is still `pending`. Returns the current record
    /// when cancelled.
    pub async fn run(&self) -> Result<ReconciliationRecord> {
        let mut updates = self.subscribe();
        let waiting = updates.wait_for(|record| record.status != ReconcileStatus::Pending);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(self.snapshot()),
            _ = waiting => {}
        }

        let started = tokio::time::Instant::now();
        loop {
            if self.status().is_terminal() {
                return self.snapshot().into_result();
            }

            // Stop before a poll that would land past either ceiling
            let attempts = self.state.borrow().attempts;
            let elapsed = started.elapsed();
            if attempts >= self.config.max_attempts
                || elapsed + self.config.interval() > self.config.max_duration()
            {
                let elapsed_ms = elapsed.as_millis() as u64;
                warn!(
                    idempotency_key = %self.state.borrow().idempotency_key,
                    attempts,
                    elapsed_ms,
                    "Write not observed before poll ceiling"
                );
                self.mark_failed(TrackerFailure::PollTimeout {
                    attempts,
                    elapsed_ms,
                });
                return self.snapshot().into_result();
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(self.snapshot()),
                _ = tokio::time::sleep(self.config.interval()) => {}
            }

            if self.poll_once().await.is_terminal() {
                return self.snapshot().into_result();
            }
            if self.cancel.is_cancelled() {
                return Ok(self.snapshot());
            }
        }
    }

    /// Wait for a terminal state without polling.
    ///
    /// Returns the current record when the tracker is cancelled first.
    pub async fn wait(&self) -> Result<ReconciliationRecord> {
        let mut updates = self.subscribe();
        let record = tokio::select! {
            biased;
            updated = updates.wait_for(|record| record.status.is_terminal()) => match updated {
                Ok(record) => record.clone(),
                Err(_) => self.snapshot(),
            },
            _ = self.cancel.cancelled() => self.snapshot(),
        };
        record.into_result()
    }
}

impl Drop for ReconciliationTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
