//! Error types for the mentor SDK

use thiserror::Error;

use crate::store::StoreError;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types
///
/// Only the write path (`WriteSubmitter`, `ReconciliationTracker`) surfaces
/// the first four variants. Canonicalization and expiry never fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// Malformed attributes or payload, rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store accepted the write but no receipt arrived in time.
    ///
    /// The submit path reports this as a pending outcome rather than an
    /// error; it surfaces from `SubmitOutcome::into_receipt` and from
    /// converting a raw `StoreError::ReceiptTimeout`.
    #[error("Write submitted, receipt pending (entity: {entity_key:?}, tx: {tx_reference:?})")]
    TransientTimeout {
        entity_key: Option<String>,
        tx_reference: Option<String>,
    },

    /// The store rejected the write
    #[error("Write rejected by store: {0}")]
    FatalWrite(String),

    /// Reconciliation gave up before the write became visible
    #[error("Write not confirmed after {attempts} polls ({elapsed_ms}ms)")]
    PollTimeout { attempts: u32, elapsed_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store read error (listing reads)
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SdkError {
    /// Whether the user should be offered a retry action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SdkError::FatalWrite(_) | SdkError::PollTimeout { .. } | SdkError::Store(_)
        )
    }

    /// Copy suitable for showing to the person who initiated the write.
    ///
    /// A poll timeout must not claim the write failed: it may still land.
    pub fn user_message(&self) -> String {
        match self {
            SdkError::Validation(msg) => format!("Please check your input: {}", msg),
            SdkError::TransientTimeout { .. } => {
                "Saved, waiting for confirmation from the network.".to_string()
            }
            SdkError::FatalWrite(_) => "The save was rejected. Please try again.".to_string(),
            SdkError::PollTimeout { .. } => {
                "We couldn't confirm your save yet. It may still appear shortly.".to_string()
            }
            SdkError::Config(_) | SdkError::Store(_) | SdkError::Serialization(_) => {
                "Something went wrong loading data. Please try again.".to_string()
            }
        }
    }
}

impl From<StoreError> for SdkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReceiptTimeout {
                entity_key,
                tx_reference,
            } => SdkError::TransientTimeout {
                entity_key,
                tx_reference,
            },
            StoreError::Rejected(msg) => SdkError::FatalWrite(msg),
            StoreError::Unavailable(msg) => SdkError::Store(msg),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SdkError {
    fn from(err: toml::de::Error) -> Self {
        SdkError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: SdkError = StoreError::Rejected("bad chain rule".into()).into();
        assert_eq!(err, SdkError::FatalWrite("bad chain rule".into()));

        let err: SdkError = StoreError::ReceiptTimeout {
            entity_key: None,
            tx_reference: Some("0xabc".into()),
        }
        .into();
        assert!(matches!(err, SdkError::TransientTimeout { entity_key: None, .. }));
    }

    #[test]
    fn test_poll_timeout_copy_does_not_claim_failure() {
        let msg = SdkError::PollTimeout {
            attempts: 20,
            elapsed_ms: 30_000,
        }
        .user_message();
        assert!(!msg.to_lowercase().contains("fail"));
        assert!(SdkError::PollTimeout { attempts: 1, elapsed_ms: 1 }.is_retryable());
        assert!(!SdkError::Validation("x".into()).is_retryable());
    }
}
