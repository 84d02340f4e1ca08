// Copyright 2025 Cowboy AI, LLC.

//! Event types and the storage trait behind the event log

use crate::infrastructure::integrity::{ChainVerificationError, EventHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when working with the event store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed
    #[error("Concurrency conflict on stream {stream_id}: expected version {expected}, but current version is {current}")]
    ConcurrencyConflict {
        /// Stream the append targeted
        stream_id: String,
        /// The version that was expected
        expected: u64,
        /// The actual current version
        current: u64,
    },

    /// Hash chain verification failed
    #[error("Integrity error: {0}")]
    Integrity(#[from] ChainVerificationError),

    /// The underlying medium could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Failed to serialize or deserialize event data
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for EventStoreError {
    fn from(err: serde_json::Error) -> Self {
        EventStoreError::SerializationError(err.to_string())
    }
}

impl EventStoreError {
    /// Check if this is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Check if this is an integrity failure
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, EventStoreError::Integrity(_))
    }

    /// Whether a caller may retry after reconstructing fresh state.
    ///
    /// Storage outages are left to the caller's own policy and are not
    /// reported as retryable here.
    pub fn is_retryable(&self) -> bool {
        self.is_concurrency_conflict()
    }
}

/// An event produced by a domain operation, not yet sequenced or hashed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Event type tag
    pub event_type: String,
    /// Serialized fact
    pub payload: String,
    /// When the fact was recorded
    pub recorded_at: DateTime<Utc>,
}

impl PendingEvent {
    /// Create a pending event from an already serialized payload
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            recorded_at: Utc::now(),
        }
    }

    /// Serialize a fact into a pending event
    pub fn from_fact<T: Serialize>(
        event_type: impl Into<String>,
        fact: &T,
    ) -> Result<Self, EventStoreError> {
        Ok(Self::new(event_type, serde_json::to_string(fact)?))
    }
}

/// An event durably appended to a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Stream this event belongs to
    pub stream_id: String,
    /// Position in the stream, starting at 1
    pub sequence: u64,
    /// Event type tag
    pub event_type: String,
    /// Serialized fact
    pub payload: String,
    /// When the fact was recorded
    pub recorded_at: DateTime<Utc>,
    /// Hash of the preceding event, or the root constant
    pub previous_hash: EventHash,
    /// Keyed hash over this event's fields and `previous_hash`
    pub hash: EventHash,
}

impl RecordedEvent {
    /// Deserialize the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Version and last hash of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Sequence of the last event, 0 if empty
    pub version: u64,
    /// Hash of the last event, root if empty
    pub hash: EventHash,
}

impl StreamHead {
    /// Head of a stream with no events
    pub const EMPTY: StreamHead = StreamHead {
        version: 0,
        hash: EventHash::ROOT,
    };
}

/// A fully sequenced and hashed batch waiting to be committed
#[derive(Debug, Clone, PartialEq)]
pub struct StagedAppend {
    /// Target stream
    pub stream_id: String,
    /// Version the stream must have at commit time
    pub expected_version: u64,
    /// Events to append, sequenced from `expected_version + 1`
    pub events: Vec<RecordedEvent>,
}

impl StagedAppend {
    /// Version of the stream after this append
    pub fn new_version(&self) -> u64 {
        self.expected_version + self.events.len() as u64
    }
}

/// Physical medium for event streams.
///
/// Implementations must make [`EventStorage::commit_batch`] all-or-nothing
/// across every append in the batch, re-checking each expected version and
/// predecessor hash at commit time.
#[async_trait]
pub trait EventStorage: Send + Sync + fmt::Debug {
    /// Current head of a stream
    async fn stream_head(&self, stream_id: &str) -> Result<StreamHead, EventStoreError>;

    /// Read up to `limit` events with sequence >= `from_sequence`, in order
    async fn read_page(
        &self,
        stream_id: &str,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Durably apply every staged append, or none of them
    async fn commit_batch(&self, appends: Vec<StagedAppend>) -> Result<(), EventStoreError>;
}
