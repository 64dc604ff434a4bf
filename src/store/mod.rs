//! Entity store boundary
//!
//! The store is an external collaborator: it accepts signed writes and
//! answers attribute-equality queries, with an unknown delay between the two.
//! Implement [`EntityStore`] to plug in a real SDK; [`MemoryStore`] is an
//! in-process implementation for tests and simulation.

mod memory;

pub use memory::{MemoryStore, MemoryStoreConfig, WriteScript};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::entity::Entity;

/// Identifiers returned once the store acknowledges a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub entity_key: String,
    pub tx_reference: String,
}

/// Attribute equality filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub key: String,
    pub value: String,
}

impl AttributeFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check whether an entity satisfies this filter
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.attribute(&self.key) == Some(self.value.as_str())
    }
}

/// Errors raised by the store boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Transaction accepted but no receipt within the store's own wait.
    /// Carries whatever identifiers were available.
    #[error("Receipt timeout (entity: {entity_key:?}, tx: {tx_reference:?})")]
    ReceiptTimeout {
        entity_key: Option<String>,
        tx_reference: Option<String>,
    },

    /// Write rejected (malformed transaction, chain rules)
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Store or indexer unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Write and query primitives of an append-only entity store.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create one immutable entity
    async fn write(
        &self,
        attributes: &BTreeMap<String, String>,
        payload: &[u8],
        ttl_seconds: u64,
    ) -> Result<WriteReceipt, StoreError>;

    /// Return every indexed entity matching all filters
    async fn query(
        &self,
        filters: &[AttributeFilter],
        want_payload: bool,
    ) -> Result<Vec<Entity>, StoreError>;
}
