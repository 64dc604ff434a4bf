//! Mentor SDK - client-side consistency for an append-only entity store
//!
//! Mentorship records (profiles, skills, asks, offers, quest progress,
//! feedback) live as immutable entities in a ledger-backed store. Writes
//! are never updated in place, and queries trail writes by an unknown delay.
//! This crate hides both facts from the UI.
//!
//! # Architecture
//!
//! - **Write path**: [`Reconciler`] → [`WriteSubmitter`] → store, then a
//!   [`ReconciliationTracker`] polls until the write is visible
//!   (`pending → submitted → indexed | error`)
//! - **Read path**: [`RecordReader`] → store → canonicalize (last writer
//!   wins per logical key) → expiration filter
//!
//! # Example
//!
//! ```rust,ignore
//! use mentor_sdk::{IdempotencyKey, LogicalKey, MemoryStore, Reconciler, SdkConfig, WriteRequest};
//!
//! let store = Arc::new(MemoryStore::with_index_lag(2));
//! let reconciler = Reconciler::with_system_clock(store, SdkConfig::default())?;
//!
//! let key = LogicalKey::profile("0xabc")?;
//! let request = WriteRequest::new(key, IdempotencyKey::new(["0xabc", "profile"]))
//!     .with_attribute("displayName", "Ada");
//!
//! let handle = reconciler.track_write(request)?;
//! let record = handle.wait().await?;
//! assert_eq!(record.status, ReconcileStatus::Indexed);
//! ```

// Entity model and attribute conventions
pub mod entity;

// Record kinds and logical keys
pub mod record;

// Pure read-side policies
pub mod expiry;
pub mod resolve;

// Store boundary
pub mod store;

pub mod clock;
pub mod idempotency;

// Write path
pub mod submit;
pub mod tracker;
pub mod reconciler;

// Read path
pub mod listing;

pub mod config;

// Error types
pub mod error;

// Re-export model types
pub use entity::Entity;
pub use record::{LogicalKey, RecordKind};

// Re-export read-side policies
pub use expiry::{ExpiringRecord, filter_live, is_live};
pub use resolve::{CanonicalView, canonicalize, resolve};

// Re-export store types
pub use store::{AttributeFilter, EntityStore, MemoryStore, StoreError, WriteReceipt};

// Re-export write path types
pub use clock::{Clock, ManualClock, SystemClock};
pub use idempotency::IdempotencyKey;
pub use submit::{Submission, SubmitOutcome, WriteRequest, WriteSubmitter};
pub use tracker::{ReconcileStatus, ReconciliationRecord, ReconciliationTracker, TrackerFailure};
pub use reconciler::{Reconciler, TrackerHandle};

// Re-export read path types
pub use listing::{ListOptions, RecordReader};

pub use config::{PollConfig, SdkConfig, SubmitConfig};

// Re-export error types
pub use error::{SdkError, Result};
