//! Idempotency keys for write attempts

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

/// Identifies one logical write attempt through its reconciliation lifecycle,
/// e.g. `0xabc:quest-1:step-2:5f0c…`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Join `parts` with `:` and append a fresh random nonce
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key: Vec<String> = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .filter(|part| !part.is_empty())
            .collect();
        key.push(uuid::Uuid::new_v4().simple().to_string());
        Self(key.join(":"))
    }

    /// Wrap a caller-supplied key
    pub fn from_raw(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(SdkError::Validation("idempotency key must not be empty".into()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
