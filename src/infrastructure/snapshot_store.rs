// Copyright 2025 Cowboy AI, LLC.

//! Snapshot store for aggregate state persistence

use async_nats::jetstream::{self, kv, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors that can occur during snapshot operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Error from underlying storage system
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Error serializing or deserializing snapshot data
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored state does not match its checksum
    #[error("Snapshot checksum mismatch for stream {stream_id} at version {version}")]
    ChecksumMismatch {
        /// Stream the snapshot belongs to
        stream_id: String,
        /// Version recorded in the snapshot
        version: u64,
    },

    /// Snapshot belongs to a different stream or aggregate type
    #[error("Snapshot of {found} cannot restore {expected}")]
    Mismatched {
        /// Stream and aggregate type being rebuilt
        expected: String,
        /// Stream and aggregate type the snapshot claims
        found: String,
    },

    /// Error from JetStream
    #[error("JetStream error: {0}")]
    JetStreamError(String),
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::SerializationError(err.to_string())
    }
}

/// Snapshot of aggregate state at a specific version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Stream this snapshot was captured from
    pub stream_id: String,
    /// Type name of the aggregate (e.g., "Transaction")
    pub aggregate_type: String,
    /// Stream version the state reflects
    pub version: u64,
    /// Serialized aggregate state
    pub state: serde_json::Value,
    /// Hex SHA-256 of the serialized state
    pub checksum: String,
    /// Timestamp when the snapshot was created
    pub created_at: DateTime<Utc>,
}

impl AggregateSnapshot {
    /// Capture state at a version, computing its checksum
    pub fn capture(
        stream_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        version: u64,
        state: serde_json::Value,
    ) -> Self {
        let checksum = state_checksum(&state);
        Self {
            stream_id: stream_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            state,
            checksum,
            created_at: Utc::now(),
        }
    }

    /// Whether the state still matches the checksum
    pub fn is_intact(&self) -> bool {
        state_checksum(&self.state) == self.checksum
    }

    /// Return self if intact, otherwise a checksum error
    pub fn verified(self) -> Result<Self, SnapshotError> {
        if self.is_intact() {
            Ok(self)
        } else {
            Err(SnapshotError::ChecksumMismatch {
                stream_id: self.stream_id,
                version: self.version,
            })
        }
    }
}

fn state_checksum(state: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(state.to_string().as_bytes()))
}

/// Trait for storing and retrieving aggregate snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Save a snapshot. A no-op when an equal or newer snapshot already exists.
    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> Result<(), SnapshotError>;

    /// Get the current snapshot for a stream, checksum-verified
    async fn load_latest_snapshot(
        &self,
        stream_id: &str,
    ) -> Result<Option<AggregateSnapshot>, SnapshotError>;
}

/// JetStream key-value implementation of snapshot storage.
///
/// One key per stream; the bucket keeps no history, so the key always holds
/// the current snapshot.
pub struct JetStreamSnapshotStore {
    bucket: kv::Store,
}

impl JetStreamSnapshotStore {
    const MAX_SAVE_ATTEMPTS: usize = 3;

    /// Create (or open) the snapshot bucket
    pub async fn new(jetstream: &Context, bucket_name: &str) -> Result<Self, SnapshotError> {
        let bucket_config = kv::Config {
            bucket: bucket_name.to_string(),
            description: "Ledger stream snapshots".to_string(),
            max_value_size: 10 * 1024 * 1024, // 10MB max snapshot size
            history: 1,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        let bucket = jetstream
            .create_key_value(bucket_config)
            .await
            .map_err(|e| SnapshotError::JetStreamError(e.to_string()))?;

        info!("JetStream snapshot store initialized with bucket: {}", bucket_name);

        Ok(Self { bucket })
    }

    /// Stream ids may contain characters NATS keys reject
    fn snapshot_key(stream_id: &str) -> String {
        format!("snapshot.{}", hex::encode(stream_id.as_bytes()))
    }

    fn decode(bytes: &[u8]) -> Result<AggregateSnapshot, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[async_trait]
impl SnapshotStore for JetStreamSnapshotStore {
    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> Result<(), SnapshotError> {
        let key = Self::snapshot_key(&snapshot.stream_id);
        let payload = Bytes::from(serde_json::to_vec(&snapshot)?);

        let mut last_error = None;
        for _ in 0..Self::MAX_SAVE_ATTEMPTS {
            let entry = self
                .bucket
                .entry(key.as_str())
                .await
                .map_err(|e| SnapshotError::JetStreamError(e.to_string()))?;

            let written = match entry {
                Some(entry) => {
                    if entry.operation == kv::Operation::Put {
                        if let Ok(existing) = Self::decode(&entry.value) {
                            if existing.version >= snapshot.version {
                                debug!(
                                    stream_id = %snapshot.stream_id,
                                    existing = existing.version,
                                    version = snapshot.version,
                                    "Newer snapshot already stored"
                                );
                                return Ok(());
                            }
                        }
                    }
                    self.bucket
                        .update(key.as_str(), payload.clone(), entry.revision)
                        .await
                        .map(|_| ())
                        .map_err(|e| SnapshotError::JetStreamError(e.to_string()))
                }
                None => self
                    .bucket
                    .create(key.as_str(), payload.clone())
                    .await
                    .map(|_| ())
                    .map_err(|e| SnapshotError::JetStreamError(e.to_string())),
            };

            match written {
                Ok(()) => {
                    info!(
                        stream_id = %snapshot.stream_id,
                        version = snapshot.version,
                        "Saved snapshot"
                    );
                    return Ok(());
                }
                // another writer raced us between read and write; re-read and compare again
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SnapshotError::StorageError("snapshot save attempts exhausted".to_string())
        }))
    }

    async fn load_latest_snapshot(
        &self,
        stream_id: &str,
    ) -> Result<Option<AggregateSnapshot>, SnapshotError> {
        let key = Self::snapshot_key(stream_id);
        let Some(bytes) = self
            .bucket
            .get(key.as_str())
            .await
            .map_err(|e| SnapshotError::JetStreamError(e.to_string()))?
        else {
            debug!(stream_id, "No snapshot found");
            return Ok(None);
        };
        Self::decode(&bytes)?.verified().map(Some)
    }
}

/// In-memory snapshot store
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, AggregateSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// Create a new in-memory snapshot store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a snapshot
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Whether no snapshot is stored
    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// Replace a stored snapshot unconditionally
    pub async fn overwrite(&self, snapshot: AggregateSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.stream_id.clone(), snapshot);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> Result<(), SnapshotError> {
        let mut snapshots = self.snapshots.write().await;
        if let Some(existing) = snapshots.get(&snapshot.stream_id) {
            if existing.version >= snapshot.version {
                return Ok(());
            }
        }
        snapshots.insert(snapshot.stream_id.clone(), snapshot);
        Ok(())
    }

    async fn load_latest_snapshot(
        &self,
        stream_id: &str,
    ) -> Result<Option<AggregateSnapshot>, SnapshotError> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(stream_id)
            .cloned()
            .map(AggregateSnapshot::verified)
            .transpose()
    }
}
