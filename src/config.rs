// Copyright 2025 Cowboy AI, LLC.

//! Ledger configuration
//!
//! Values come from [`LedgerConfig::default`], a serialized document, or the
//! process environment via [`LedgerConfig::from_env`]. The keyed-hash secret
//! is deliberately absent: it is provided through a
//! [`KeyProvider`](crate::infrastructure::KeyProvider).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed
    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv {
        /// Variable name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// A value is outside its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime options for the event log, reconstructor and command handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Verify each event against the running hash while reading
    pub verify_chain_on_read: bool,

    /// Page size used when reading a stream
    pub read_batch_size: usize,

    /// Load and write snapshots
    pub use_snapshots: bool,

    /// Snapshot every time the stream version reaches a multiple of this
    pub snapshot_threshold: u64,

    /// Attempts per command before a concurrency conflict is surfaced
    pub max_command_attempts: u32,

    /// Upper bound for one atomic append, in milliseconds
    pub append_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            verify_chain_on_read: true,
            read_batch_size: 256,
            use_snapshots: true,
            snapshot_threshold: 100,
            max_command_attempts: 3,
            append_timeout_ms: 5_000,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Supported env vars:
    /// - `CIM_LEDGER_VERIFY_CHAIN_ON_READ`
    /// - `CIM_LEDGER_READ_BATCH_SIZE`
    /// - `CIM_LEDGER_USE_SNAPSHOTS`
    /// - `CIM_LEDGER_SNAPSHOT_THRESHOLD`
    /// - `CIM_LEDGER_MAX_COMMAND_ATTEMPTS`
    /// - `CIM_LEDGER_APPEND_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed, or
    /// if the resulting configuration fails [`LedgerConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(verify) = env_bool("CIM_LEDGER_VERIFY_CHAIN_ON_READ")? {
            config.verify_chain_on_read = verify;
        }
        if let Some(size) = env_parse::<usize>("CIM_LEDGER_READ_BATCH_SIZE")? {
            config.read_batch_size = size;
        }
        if let Some(use_snapshots) = env_bool("CIM_LEDGER_USE_SNAPSHOTS")? {
            config.use_snapshots = use_snapshots;
        }
        if let Some(threshold) = env_parse::<u64>("CIM_LEDGER_SNAPSHOT_THRESHOLD")? {
            config.snapshot_threshold = threshold;
        }
        if let Some(attempts) = env_parse::<u32>("CIM_LEDGER_MAX_COMMAND_ATTEMPTS")? {
            config.max_command_attempts = attempts;
        }
        if let Some(timeout) = env_parse::<u64>("CIM_LEDGER_APPEND_TIMEOUT_MS")? {
            config.append_timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every numeric option is positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_batch_size == 0 {
            return Err(ConfigError::Invalid("read_batch_size must be positive".into()));
        }
        if self.snapshot_threshold == 0 {
            return Err(ConfigError::Invalid("snapshot_threshold must be positive".into()));
        }
        if self.max_command_attempts == 0 {
            return Err(ConfigError::Invalid("max_command_attempts must be positive".into()));
        }
        if self.append_timeout_ms == 0 {
            return Err(ConfigError::Invalid("append_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Append timeout as a [`Duration`]
    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.append_timeout_ms)
    }

    /// Set the snapshot threshold
    pub fn with_snapshot_threshold(mut self, threshold: u64) -> Self {
        self.snapshot_threshold = threshold;
        self
    }

    /// Enable or disable snapshots
    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.use_snapshots = enabled;
        self
    }

    /// Set the read page size
    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    /// Enable or disable chain verification on read
    pub fn with_verify_chain_on_read(mut self, verify: bool) -> Self {
        self.verify_chain_on_read = verify;
        self
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<T>().map(Some).map_err(|e| ConfigError::InvalidEnv {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: "must be a boolean (true/false/1/0)".to_string(),
        }),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.verify_chain_on_read);
        assert!(config.use_snapshots);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(LedgerConfig::default().with_read_batch_size(0).validate().is_err());
        assert!(LedgerConfig::default().with_snapshot_threshold(0).validate().is_err());
        let config = LedgerConfig {
            max_command_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("X", "YES"), Ok(true));
        assert_eq!(parse_bool("X", " 0 "), Ok(false));
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{ "snapshot_threshold": 2 }"#).unwrap();
        assert_eq!(config.snapshot_threshold, 2);
        assert_eq!(config.read_batch_size, 256);
    }
}
