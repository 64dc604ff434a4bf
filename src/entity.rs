//! Immutable store entities and the attribute conventions shared with
//! existing stored data.
//!
//! Attribute values are strings. `createdAt` is an ISO-8601 timestamp with
//! millisecond precision and a `Z` suffix, `ttlSeconds` is a decimal integer.
//! Both must round-trip bit-for-bit with records written by other clients.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Creation timestamp attribute (ISO-8601)
pub const CREATED_AT: &str = "createdAt";
/// Declared time-to-live attribute (decimal seconds)
pub const TTL_SECONDS: &str = "ttlSeconds";
/// Record type discriminator
pub const TYPE: &str = "type";
/// Owning wallet address
pub const WALLET: &str = "wallet";
/// Client-chosen key of the write attempt that produced the entity
pub const IDEMPOTENCY_KEY: &str = "idempotencyKey";
/// Transaction hash, carried by transaction-reference side entities
pub const TX_HASH: &str = "txHash";
/// Primary entity key, carried by transaction-reference side entities
pub const ENTITY_KEY: &str = "entityKey";

/// An immutable record in the entity store.
///
/// Never mutated by the application: an update is a new entity with the same
/// logical-key attributes, a delete is store-level expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned key
    pub key: String,
    /// Queryable attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Opaque payload (usually JSON), absent when not requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    /// Transaction that created this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_reference: Option<String>,
}

impl Entity {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attributes: BTreeMap::new(),
            payload: None,
            tx_reference: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_tx_reference(mut self, tx_reference: impl Into<String>) -> Self {
        self.tx_reference = Some(tx_reference.into());
        self
    }

    /// Get an attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// `createdAt` in epoch milliseconds, `None` if missing or unparsable
    pub fn created_at_ms(&self) -> Option<i64> {
        self.attribute(CREATED_AT).and_then(parse_timestamp)
    }

    /// `ttlSeconds`, `None` if missing or unparsable
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.attribute(TTL_SECONDS)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
    }

    /// Parse a decimal counter attribute (e.g. `usageCount`)
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.attribute(name).and_then(|raw| raw.trim().parse::<u64>().ok())
    }

    /// Decode the JSON payload
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}

/// Parse an ISO-8601 timestamp into epoch milliseconds.
///
/// Accepts RFC 3339 with any offset, offset-less date-times (read as UTC) and
/// bare dates. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Format epoch milliseconds as `YYYY-MM-DDTHH:MM:SS.sssZ`.
pub fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
