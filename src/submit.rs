//! Write submission
//!
//! Turns a logical write into exactly one entity write against the store.
//! A write that was accepted but whose receipt did not arrive in time is not
//! a failure: it comes back as [`SubmitOutcome::Pending`] and reconciliation
//! takes over from whatever identifiers are known.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::config::SubmitConfig;
use crate::entity::{self, format_timestamp, parse_timestamp};
use crate::error::{Result, SdkError};
use crate::idempotency::IdempotencyKey;
use crate::record::{LogicalKey, RecordKind, DURABLE_TTL_SECS};
use crate::store::{EntityStore, StoreError, WriteReceipt};

/// One logical write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub logical_key: LogicalKey,
    /// Extra queryable attributes; key, type and timestamps are added on submit
    pub attributes: BTreeMap<String, String>,
    pub payload: Vec<u8>,
    pub ttl_seconds: u64,
    pub idempotency_key: IdempotencyKey,
}

impl WriteRequest {
    /// Request with an empty payload and the kind's default lifetime
    pub fn new(logical_key: LogicalKey, idempotency_key: IdempotencyKey) -> Self {
        let ttl_seconds = logical_key
            .kind()
            .default_ttl_seconds()
            .unwrap_or(DURABLE_TTL_SECS);
        Self {
            logical_key,
            attributes: BTreeMap::new(),
            payload: Vec::new(),
            ttl_seconds,
            idempotency_key,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize `value` as the JSON payload
    pub fn with_json_payload<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.payload = serde_json::to_vec(value)?;
        Ok(self)
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.logical_key.kind()
    }
}

/// What the store told us about a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmitOutcome {
    /// Receipt received
    Confirmed(WriteReceipt),
    /// Accepted without a receipt in time; visibility must be confirmed by polling
    Pending {
        entity_key: Option<String>,
        tx_reference: Option<String>,
    },
}

impl SubmitOutcome {
    pub fn entity_key(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Confirmed(receipt) => Some(&receipt.entity_key),
            SubmitOutcome::Pending { entity_key, .. } => entity_key.as_deref(),
        }
    }

    pub fn tx_reference(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Confirmed(receipt) => Some(&receipt.tx_reference),
            SubmitOutcome::Pending { tx_reference, .. } => tx_reference.as_deref(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SubmitOutcome::Pending { .. })
    }

    /// The receipt, for callers that cannot proceed without one.
    ///
    /// A pending outcome becomes [`SdkError::TransientTimeout`] carrying the
    /// known identifiers.
    pub fn into_receipt(self) -> Result<WriteReceipt> {
        match self {
            SubmitOutcome::Confirmed(receipt) => Ok(receipt),
            SubmitOutcome::Pending {
                entity_key,
                tx_reference,
            } => Err(SdkError::TransientTimeout {
                entity_key,
                tx_reference,
            }),
        }
    }
}

/// A write handed to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub outcome: SubmitOutcome,
    /// `createdAt` stamped on the written entity
    pub created_at_ms: i64,
}

/// Submits logical writes to the entity store
pub struct WriteSubmitter {
    store: Arc<dyn EntityStore>,
    config: SubmitConfig,
    clock: Arc<dyn Clock>,
}

impl WriteSubmitter {
    pub fn new(store: Arc<dyn EntityStore>, config: SubmitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Reject malformed requests before anything touches the network
    pub fn validate(&self, request: &WriteRequest) -> Result<()> {
        if request.ttl_seconds == 0 {
            return Err(SdkError::Validation("ttl_seconds must be positive".into()));
        }
        if request.payload.len() > self.config.max_payload_bytes {
            return Err(SdkError::Validation(format!(
                "payload is {} bytes, limit is {}",
                request.payload.len(),
                self.config.max_payload_bytes
            )));
        }

        for (name, value) in &request.attributes {
            if name.trim().is_empty() {
                return Err(SdkError::Validation("attribute name must not be empty".into()));
            }
            if value.is_empty() {
                return Err(SdkError::Validation(format!("attribute '{}' is empty", name)));
            }
        }

        let kind = request.kind();
        let must_match = |name: &str, expected: &str| -> Result<()> {
            match request.attributes.get(name) {
                Some(actual) if actual != expected => Err(SdkError::Validation(format!(
                    "attribute '{}' is '{}' but the write targets '{}'",
                    name, actual, expected
                ))),
                _ => Ok(()),
            }
        };
        must_match(entity::TYPE, kind.as_str())?;
        must_match(entity::TTL_SECONDS, &request.ttl_seconds.to_string())?;
        must_match(entity::IDEMPOTENCY_KEY, request.idempotency_key.as_str())?;
        for (name, value) in request.logical_key.parts() {
            must_match(name, value)?;
        }

        if let Some(created_at) = request.attributes.get(entity::CREATED_AT) {
            if parse_timestamp(created_at).is_none() {
                return Err(SdkError::Validation(format!(
                    "createdAt '{}' is not an ISO-8601 timestamp",
                    created_at
                )));
            }
        }
        Ok(())
    }

    /// Final attribute set for the entity, plus its `createdAt` in milliseconds
    fn entity_attributes(&self, request: &WriteRequest) -> Result<(BTreeMap<String, String>, i64)> {
        let mut attributes = request.attributes.clone();
        for (name, value) in request.logical_key.parts() {
            attributes.insert(name.clone(), value.clone());
        }
        attributes.insert(entity::TYPE.into(), request.kind().as_str().into());
        attributes.insert(entity::TTL_SECONDS.into(), request.ttl_seconds.to_string());
        attributes.insert(
            entity::IDEMPOTENCY_KEY.into(),
            request.idempotency_key.to_string(),
        );

        let created_at_ms = match attributes.get(entity::CREATED_AT).and_then(|v| parse_timestamp(v)) {
            Some(ms) => ms,
            None => {
                let now = self.clock.now_ms();
                let stamp = format_timestamp(now)
                    .ok_or_else(|| SdkError::Validation(format!("clock value {} out of range", now)))?;
                attributes.insert(entity::CREATED_AT.into(), stamp);
                now
            }
        };
        Ok((attributes, created_at_ms))
    }

    /// Submit one write.
    ///
    /// Exactly one write attempt is made. Returns `Pending` rather than an
    /// error when the receipt does not arrive within `receipt_timeout_ms`.
    pub async fn submit(&self, request: &WriteRequest) -> Result<Submission> {
        self.validate(request)?;
        let (attributes, created_at_ms) = self.entity_attributes(request)?;
        let idempotency_key = request.idempotency_key.as_str();

        debug!(
            %idempotency_key,
            logical_key = %request.logical_key,
            ttl_seconds = request.ttl_seconds,
            "Submitting write"
        );

        let result = tokio::time::timeout(
            self.config.receipt_timeout(),
            self.store
                .write(&attributes, &request.payload, request.ttl_seconds),
        )
        .await;

        let outcome = match result {
            Ok(Ok(receipt)) => {
                debug!(%idempotency_key, entity_key = %receipt.entity_key, "Write confirmed");
                SubmitOutcome::Confirmed(receipt)
            }
            Ok(Err(StoreError::ReceiptTimeout {
                entity_key,
                tx_reference,
            })) => {
                debug!(%idempotency_key, ?entity_key, ?tx_reference, "Write accepted, receipt pending");
                SubmitOutcome::Pending {
                    entity_key,
                    tx_reference,
                }
            }
            Ok(Err(err)) => {
                error!(%idempotency_key, error = %err, "Write rejected");
                return Err(SdkError::FatalWrite(err.to_string()));
            }
            Err(_) => {
                debug!(
                    %idempotency_key,
                    timeout_ms = self.config.receipt_timeout_ms,
                    "No receipt before timeout, treating write as pending"
                );
                SubmitOutcome::Pending {
                    entity_key: None,
                    tx_reference: None,
                }
            }
        };

        if self.config.record_tx_reference {
            if let Some(tx_reference) = outcome.tx_reference() {
                self.spawn_tx_reference(request, outcome.entity_key(), tx_reference);
            }
        }

        Ok(Submission {
            outcome,
            created_at_ms,
        })
    }

    /// Fire-and-forget side entity linking the attempt to its transaction.
    /// Failures are logged and swallowed.
    fn spawn_tx_reference(&self, request: &WriteRequest, entity_key: Option<&str>, tx_reference: &str) {
        let mut attributes = BTreeMap::new();
        attributes.insert(entity::TYPE.to_string(), RecordKind::TxReference.as_str().to_string());
        attributes.insert(entity::IDEMPOTENCY_KEY.to_string(), request.idempotency_key.to_string());
        attributes.insert(entity::TX_HASH.to_string(), tx_reference.to_string());
        attributes.insert("recordType".to_string(), request.kind().as_str().to_string());
        attributes.insert(entity::TTL_SECONDS.to_string(), DURABLE_TTL_SECS.to_string());
        if let Some(key) = entity_key {
            attributes.insert(entity::ENTITY_KEY.to_string(), key.to_string());
        }
        if let Some(wallet) = request.logical_key.get(entity::WALLET) {
            attributes.insert(entity::WALLET.to_string(), wallet.to_string());
        }
        if let Some(stamp) = format_timestamp(self.clock.now_ms()) {
            attributes.insert(entity::CREATED_AT.to_string(), stamp);
        }

        let store = Arc::clone(&self.store);
        let idempotency_key = request.idempotency_key.to_string();
        tokio::spawn(async move {
            match store.write(&attributes, &[], DURABLE_TTL_SECS).await {
                Ok(receipt) => {
                    debug!(%idempotency_key, entity_key = %receipt.entity_key, "Recorded tx reference")
                }
                Err(err) => {
                    warn!(%idempotency_key, error = %err, "Failed to record tx reference")
                }
            }
        });
    }
}
