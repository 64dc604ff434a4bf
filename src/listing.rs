//! Listing reads
//!
//! Every read of a record kind goes through the same pipeline: query the
//! store, collapse each logical record to its canonical entity, then drop
//! expired ephemeral records. Expiry is applied after canonicalization so an
//! expired current version never lets a superseded one resurface.

use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::entity::{self, Entity};
use crate::error::Result;
use crate::expiry;
use crate::record::{LogicalKey, RecordKind};
use crate::resolve::{canonicalize, CanonicalView};
use crate::store::{AttributeFilter, EntityStore};

/// Listing options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Keep expired ephemeral records (history views)
    pub include_expired: bool,
    /// Fetch payloads along with attributes
    pub with_payload: bool,
}

impl ListOptions {
    pub fn with_payload() -> Self {
        Self {
            with_payload: true,
            ..Default::default()
        }
    }
}

/// Reads canonical, live records from the store
pub struct RecordReader {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl RecordReader {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Canonical records of `kind` matching `filters`
    pub async fn list(
        &self,
        kind: RecordKind,
        filters: &[AttributeFilter],
        options: ListOptions,
    ) -> Result<Vec<Entity>> {
        let mut query = Vec::with_capacity(filters.len() + 1);
        query.push(AttributeFilter::eq(entity::TYPE, kind.as_str()));
        query.extend(
            filters
                .iter()
                .filter(|filter| filter.key != entity::TYPE)
                .cloned(),
        );

        let entities = self.store.query(&query, options.with_payload).await?;
        let fetched = entities.len();
        let canonical = canonicalize(kind, &entities);
        let records = if kind.is_ephemeral() && !options.include_expired {
            expiry::filter_live(kind, canonical, self.clock.now_ms())
        } else {
            canonical
        };

        debug!(kind = %kind, fetched, returned = records.len(), "Listed records");
        Ok(records)
    }

    /// Current live entity of one logical record
    pub async fn current(&self, key: &LogicalKey) -> Result<Option<Entity>> {
        let kind = key.kind();
        let entities = self.store.query(&key.filters(), true).await?;
        let view = CanonicalView::build(kind, &entities);
        Ok(view
            .get(key)
            .filter(|entity| !kind.is_ephemeral() || expiry::is_live(kind, entity, self.clock.now_ms()))
            .cloned())
    }
}
