//! Canonicalization of append-only records
//!
//! Reading a logical record means folding over every entity that shares its
//! logical key and keeping the current one. The policy is last-writer-wins:
//! highest counter (for kinds that carry one), then latest `createdAt`.
//! Storage order never decides the winner, except between entities whose
//! rank is identical (a clock collision), where the first in input order is
//! kept. That tie-break is stable but arbitrary.
//!
//! Everything here is pure: no clock, no network, no errors.

use std::collections::BTreeMap;

use crate::entity::Entity;
use crate::record::{LogicalKey, RecordKind};

/// Grouping key for canonicalization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// Entity carries every key attribute of its kind
    Logical(LogicalKey),
    /// Entity is missing key attributes and stands alone, keyed by entity key
    Ungrouped(String),
}

impl GroupKey {
    pub fn of(kind: RecordKind, entity: &Entity) -> Self {
        match LogicalKey::of(kind, entity) {
            Some(key) => GroupKey::Logical(key),
            None => GroupKey::Ungrouped(entity.key.clone()),
        }
    }
}

/// (counter, createdAt); `None` ranks below any value
type Rank = (Option<u64>, Option<i64>);

fn rank(kind: RecordKind, entity: &Entity) -> Rank {
    let counter = kind.counter_attribute().and_then(|attr| entity.counter(attr));
    (counter, entity.created_at_ms())
}

/// Select the current entity of one logical record.
///
/// Returns `None` only for empty input.
pub fn resolve(kind: RecordKind, entities: &[Entity]) -> Option<Entity> {
    let mut best: Option<(&Entity, Rank)> = None;
    for entity in entities {
        let candidate = rank(kind, entity);
        match best {
            Some((_, current)) if candidate <= current => {}
            _ => best = Some((entity, candidate)),
        }
    }
    best.map(|(entity, _)| entity.clone())
}

/// Group entities by logical key, preserving input order within each group
pub fn group_by_logical_key(kind: RecordKind, entities: &[Entity]) -> BTreeMap<GroupKey, Vec<Entity>> {
    let mut groups: BTreeMap<GroupKey, Vec<Entity>> = BTreeMap::new();
    for entity in entities {
        groups
            .entry(GroupKey::of(kind, entity))
            .or_default()
            .push(entity.clone());
    }
    groups
}

/// One canonical entity per logical record, ordered by group key
pub fn canonicalize(kind: RecordKind, entities: &[Entity]) -> Vec<Entity> {
    CanonicalView::build(kind, entities).into_entities()
}

/// Canonical entities addressable by logical key
#[derive(Debug, Clone, Default)]
pub struct CanonicalView {
    records: BTreeMap<GroupKey, Entity>,
}

impl CanonicalView {
    pub fn build(kind: RecordKind, entities: &[Entity]) -> Self {
        let records = group_by_logical_key(kind, entities)
            .into_iter()
            .filter_map(|(key, group)| resolve(kind, &group).map(|entity| (key, entity)))
            .collect();
        Self { records }
    }

    /// Current entity for a logical key
    pub fn get(&self, key: &LogicalKey) -> Option<&Entity> {
        self.records.get(&GroupKey::Logical(key.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &Entity)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.records.into_values().collect()
    }
}
