//! Expiration filter for records with a declared time-to-live
//!
//! An entity is live while `now < createdAt + ttlSeconds * 1000`. The check
//! never fails: a missing `ttlSeconds` falls back to the kind's documented
//! default, and anything that cannot be anchored in time is kept live rather
//! than hidden from a listing.

use serde::Serialize;

use crate::entity::Entity;
use crate::record::RecordKind;

/// An entity together with its computed expiry
#[derive(Debug, Clone, Serialize)]
pub struct ExpiringRecord {
    pub entity: Entity,
    /// `None` when the expiry cannot be determined
    pub expires_at_ms: Option<i64>,
    pub is_live: bool,
}

/// Expiry instant in epoch milliseconds, if it can be determined
pub fn expires_at_ms(entity: &Entity, default_ttl_seconds: Option<u64>) -> Option<i64> {
    let created_at = entity.created_at_ms()?;
    let ttl_seconds = entity.ttl_seconds().or(default_ttl_seconds)?;
    let ttl_ms = i64::try_from(ttl_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    Some(created_at.saturating_add(ttl_ms))
}

/// Liveness with an explicit fallback TTL
pub fn is_live_with_default(entity: &Entity, now_ms: i64, default_ttl_seconds: Option<u64>) -> bool {
    match expires_at_ms(entity, default_ttl_seconds) {
        Some(expires_at) => now_ms < expires_at,
        None => true,
    }
}

/// Whether an entity of `kind` is still live at `now_ms`
pub fn is_live(kind: RecordKind, entity: &Entity, now_ms: i64) -> bool {
    is_live_with_default(entity, now_ms, kind.default_ttl_seconds())
}

/// Keep only live entities, preserving order
pub fn filter_live(kind: RecordKind, entities: Vec<Entity>, now_ms: i64) -> Vec<Entity> {
    entities
        .into_iter()
        .filter(|entity| is_live(kind, entity, now_ms))
        .collect()
}

/// Build the expiring view of one entity
pub fn expiring(kind: RecordKind, entity: &Entity, now_ms: i64) -> ExpiringRecord {
    let expires_at = expires_at_ms(entity, kind.default_ttl_seconds());
    ExpiringRecord {
        entity: entity.clone(),
        expires_at_ms: expires_at,
        is_live: expires_at.map_or(true, |at| now_ms < at),
    }
}
