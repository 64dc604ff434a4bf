//! In-process entity store with simulated indexing lag
//!
//! Entities become queryable only after a configurable number of subsequent
//! queries, which models an indexer that trails the ledger. Writes can be
//! scripted to time out, stall or be rejected.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use super::{AttributeFilter, EntityStore, StoreError, WriteReceipt};
use crate::entity::{self, Entity};

/// How the next write behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteScript {
    /// Store the entity and return a receipt
    Accept,
    /// Store the entity but report a receipt timeout with the chosen identifiers
    ReceiptTimeout {
        with_entity_key: bool,
        with_tx_reference: bool,
    },
    /// Store the entity and never answer
    Stall,
    /// Reject without storing
    Reject(String),
}

/// Configuration for the memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreConfig {
    /// Queries that miss a new entity before it becomes visible
    pub index_lag_queries: u64,
    /// Reject every write whose `type` attribute equals this value
    pub reject_type: Option<String>,
}

struct StoredEntity {
    entity: Entity,
    /// Query number from which the entity is visible
    visible_from_query: u64,
}

/// In-memory [`EntityStore`]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    entities: Mutex<Vec<StoredEntity>>,
    scripts: Mutex<VecDeque<WriteScript>>,
    write_count: AtomicU64,
    query_count: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            entities: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            write_count: AtomicU64::new(0),
            query_count: AtomicU64::new(0),
        }
    }

    /// Store where every write is visible to the next query
    pub fn immediate() -> Self {
        Self::new(MemoryStoreConfig::default())
    }

    /// Store where writes stay invisible for `lag` queries
    pub fn with_index_lag(lag: u64) -> Self {
        Self::new(MemoryStoreConfig {
            index_lag_queries: lag,
            ..Default::default()
        })
    }

    /// Queue behavior for upcoming writes; unscripted writes are accepted
    pub async fn script(&self, scripts: impl IntoIterator<Item = WriteScript>) {
        self.scripts.lock().await.extend(scripts);
    }

    /// Insert an already-indexed entity
    pub async fn seed(&self, entity: Entity) {
        self.entities.lock().await.push(StoredEntity {
            entity,
            visible_from_query: 0,
        });
    }

    /// Snapshot of every stored entity, indexed or not
    pub async fn entities(&self) -> Vec<Entity> {
        self.entities
            .lock()
            .await
            .iter()
            .map(|stored| stored.entity.clone())
            .collect()
    }

    /// Number of write calls received
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Number of query calls received
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    fn tx_hash(entity_key: &str, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entity_key.as_bytes());
        hasher.update(nonce.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::immediate()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn write(
        &self,
        attributes: &BTreeMap<String, String>,
        payload: &[u8],
        _ttl_seconds: u64,
    ) -> Result<WriteReceipt, StoreError> {
        let nonce = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or(WriteScript::Accept);

        if let Some(ref rejected) = self.config.reject_type {
            if attributes.get(entity::TYPE) == Some(rejected) {
                return Err(StoreError::Rejected(format!("type '{}' not accepted", rejected)));
            }
        }
        if let WriteScript::Reject(reason) = script {
            return Err(StoreError::Rejected(reason));
        }

        let entity_key = format!("0x{:040x}", nonce);
        let tx_reference = Self::tx_hash(&entity_key, nonce);
        let entity = Entity {
            key: entity_key.clone(),
            attributes: attributes.clone(),
            payload: Some(payload.to_vec()),
            tx_reference: Some(tx_reference.clone()),
        };

        let visible_from_query =
            self.query_count.load(Ordering::SeqCst) + self.config.index_lag_queries + 1;
        self.entities.lock().await.push(StoredEntity {
            entity,
            visible_from_query,
        });
        debug!(%entity_key, visible_from_query, "Memory store accepted write");

        match script {
            WriteScript::ReceiptTimeout {
                with_entity_key,
                with_tx_reference,
            } => Err(StoreError::ReceiptTimeout {
                entity_key: with_entity_key.then_some(entity_key),
                tx_reference: with_tx_reference.then_some(tx_reference),
            }),
            WriteScript::Stall => std::future::pending().await,
            _ => Ok(WriteReceipt {
                entity_key,
                tx_reference,
            }),
        }
    }

    async fn query(
        &self,
        filters: &[AttributeFilter],
        want_payload: bool,
    ) -> Result<Vec<Entity>, StoreError> {
        let query_number = self.query_count.fetch_add(1, Ordering::SeqCst) + 1;
        let entities = self.entities.lock().await;

        Ok(entities
            .iter()
            .filter(|stored| stored.visible_from_query <= query_number)
            .filter(|stored| filters.iter().all(|f| f.matches(&stored.entity)))
            .map(|stored| {
                let mut entity = stored.entity.clone();
                if !want_payload {
                    entity.payload = None;
                }
                entity
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_index_lag() {
        let store = MemoryStore::with_index_lag(2);
        let receipt = store
            .write(&attrs(&[("type", "profile")]), b"{}", 60)
            .await
            .unwrap();
        assert!(receipt.tx_reference.starts_with("0x"));

        let filters = [AttributeFilter::eq("type", "profile")];
        assert!(store.query(&filters, false).await.unwrap().is_empty());
        assert!(store.query(&filters, false).await.unwrap().is_empty());

        let found = store.query(&filters, false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, receipt.entity_key);
        assert!(found[0].payload.is_none());
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_writes() {
        let store = MemoryStore::immediate();
        store
            .script([
                WriteScript::Reject("nonce too low".into()),
                WriteScript::ReceiptTimeout {
                    with_entity_key: false,
                    with_tx_reference: true,
                },
            ])
            .await;

        let err = store.write(&attrs(&[]), b"", 1).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("nonce too low".into()));

        match store.write(&attrs(&[]), b"", 1).await.unwrap_err() {
            StoreError::ReceiptTimeout {
                entity_key,
                tx_reference,
            } => {
                assert!(entity_key.is_none());
                assert!(tx_reference.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Rejected write stored nothing, timed-out write did land
        assert_eq!(store.entities().await.len(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_reject_type() {
        let store = MemoryStore::new(MemoryStoreConfig {
            reject_type: Some("tx_reference".into()),
            ..Default::default()
        });
        assert!(store
            .write(&attrs(&[("type", "tx_reference")]), b"", 1)
            .await
            .is_err());
        assert!(store.write(&attrs(&[("type", "profile")]), b"", 1).await.is_ok());
    }
}
