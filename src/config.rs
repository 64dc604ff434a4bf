//! SDK configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! [poll]
//! interval_ms = 1500
//! max_duration_ms = 30000
//! max_attempts = 20
//!
//! [submit]
//! receipt_timeout_ms = 15000
//! record_tx_reference = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SdkError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
}

impl SdkConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SdkConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.submit.validate()
    }
}

/// Reconciliation polling cadence and ceilings.
///
/// Polling is fixed-interval: indexer lag is bounded and roughly uniform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between polls in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Wall-clock ceiling for one reconciliation in milliseconds
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Maximum number of poll reads
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval_ms() -> u64 { 1500 }
fn default_max_duration_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 20 }

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_duration_ms: default_max_duration_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollConfig {
    /// Configuration for a person waiting on a form (fast cadence, short ceiling)
    pub fn for_interactive() -> Self {
        Self {
            interval_ms: 1000,
            max_duration_ms: 20_000,
            max_attempts: 20,
        }
    }

    /// Configuration for background writes nobody is watching
    pub fn for_batch() -> Self {
        Self {
            interval_ms: 5000,
            max_duration_ms: 120_000,
            max_attempts: 24,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(SdkError::Config("poll.interval_ms must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(SdkError::Config("poll.max_attempts must be positive".into()));
        }
        if self.max_duration_ms < self.interval_ms {
            return Err(SdkError::Config(format!(
                "poll.max_duration_ms ({}) is shorter than poll.interval_ms ({})",
                self.max_duration_ms, self.interval_ms
            )));
        }
        Ok(())
    }
}

/// Write submission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitConfig {
    /// Bounded wait for a write receipt in milliseconds
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    /// Write a best-effort transaction-reference side entity
    #[serde(default = "default_true")]
    pub record_tx_reference: bool,

    /// Largest accepted payload in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_receipt_timeout_ms() -> u64 { 15_000 }
fn default_true() -> bool { true }
fn default_max_payload_bytes() -> usize { 120_000 }

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_ms: default_receipt_timeout_ms(),
            record_tx_reference: default_true(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl SubmitConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receipt_timeout_ms == 0 {
            return Err(SdkError::Config("submit.receipt_timeout_ms must be positive".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(SdkError::Config("submit.max_payload_bytes must be positive".into()));
        }
        Ok(())
    }
}
