// Copyright 2025 Cowboy AI, LLC.

//! Snapshot policy
//!
//! Decides, after a successful append, whether the new stream version
//! deserves a snapshot. Snapshots are an optimization: the decision never
//! affects correctness, only how much of a stream a rebuild has to replay.

use crate::config::LedgerConfig;
use serde::{Deserialize, Serialize};

/// Policy configuration for automatic snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    /// Whether this policy is active
    pub enabled: bool,
    /// Snapshot each time the version reaches a multiple of this
    pub threshold: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl SnapshotPolicy {
    /// Build the policy from ledger configuration
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            enabled: config.use_snapshots,
            threshold: config.snapshot_threshold,
        }
    }

    /// A policy that never snapshots
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            threshold: u64::MAX,
        }
    }

    /// Whether an append moving a stream from `previous` to `current`
    /// reached or crossed a multiple of the threshold.
    ///
    /// A single batch may jump past a multiple (e.g. 1 -> 3 with threshold 2);
    /// that still counts, and the snapshot is taken at `current`.
    pub fn should_snapshot(&self, previous: u64, current: u64) -> bool {
        if !self.enabled || self.threshold == 0 || current <= previous {
            return false;
        }
        current / self.threshold > previous / self.threshold
    }
}
