// Copyright 2025 Cowboy AI, LLC.

//! Event replay service for rebuilding aggregates
//!
//! A rebuild starts from the latest snapshot when snapshots are enabled and
//! one is available, then applies every later event in sequence. Cost is
//! proportional to the events since the snapshot, not to stream length.

use crate::aggregate::{Aggregate, DomainEvent};
use crate::infrastructure::event_log::EventLog;
use crate::infrastructure::event_store::{EventStoreError, RecordedEvent};
use crate::infrastructure::snapshot_store::{AggregateSnapshot, SnapshotError, SnapshotStore};
use futures::stream::TryStreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors that can occur during event replay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// Neither events nor a snapshot exist for the stream
    #[error("Aggregate not found: {0}")]
    NotFound(String),

    /// Error from the underlying event store
    #[error("Event store error: {0}")]
    EventStoreError(#[from] EventStoreError),

    /// A stored event cannot be applied to the state replay has reached.
    ///
    /// The log or its chain is invalid; this is a defect, not a runtime
    /// condition, and must not be retried.
    #[error("Corrupt stream {stream_id} at sequence {sequence}: {reason}")]
    CorruptStream {
        /// Stream being replayed
        stream_id: String,
        /// Offending event
        sequence: u64,
        /// What went wrong
        reason: String,
    },
}

impl ReplayError {
    /// Check if the stream simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplayError::NotFound(_))
    }

    /// Whether this error indicates invalid stored data
    pub fn is_fatal(&self) -> bool {
        match self {
            ReplayError::CorruptStream { .. } => true,
            ReplayError::EventStoreError(e) => e.is_integrity_error(),
            ReplayError::NotFound(_) => false,
        }
    }
}

/// Statistics collected during a rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayStats {
    /// Version of the snapshot the rebuild started from
    pub snapshot_version: Option<u64>,
    /// Number of events applied on top of it
    pub events_applied: u64,
    /// Version reached
    pub version: u64,
    /// Total duration of the rebuild in milliseconds
    pub duration_ms: u64,
}

/// Rebuilds aggregates of type `A` from the event log
pub struct AggregateRebuilder<A: Aggregate> {
    log: EventLog,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    _phantom: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for AggregateRebuilder<A> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            snapshots: self.snapshots.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> AggregateRebuilder<A> {
    /// Create a rebuilder; `snapshots` is consulted only when the log's
    /// configuration enables snapshots
    pub fn new(log: EventLog, snapshots: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self {
            log,
            snapshots,
            _phantom: PhantomData,
        }
    }

    /// Rebuild the aggregate for a stream
    pub async fn rebuild(&self, stream_id: &str) -> Result<A, ReplayError> {
        self.rebuild_with_stats(stream_id)
            .await
            .map(|(aggregate, _)| aggregate)
    }

    /// Rebuild the aggregate and report how it was done
    pub async fn rebuild_with_stats(&self, stream_id: &str) -> Result<(A, ReplayStats), ReplayError> {
        let start_time = Instant::now();
        let mut stats = ReplayStats::default();

        let mut aggregate = match self.load_snapshot(stream_id).await {
            Some((aggregate, version)) => {
                stats.snapshot_version = Some(version);
                aggregate
            }
            None => A::blank(stream_id),
        };
        let from = aggregate.version() + 1;

        let mut events = self.log.read_stream(stream_id, from);
        while let Some(recorded) = events.try_next().await? {
            let event = decode::<A>(&recorded)?;
            aggregate.apply(&event).map_err(|e| {
                error!(
                    stream_id,
                    sequence = recorded.sequence,
                    state = %e.state,
                    event_type = %e.event_type,
                    "Stored event rejected by aggregate state"
                );
                ReplayError::CorruptStream {
                    stream_id: stream_id.to_string(),
                    sequence: recorded.sequence,
                    reason: e.to_string(),
                }
            })?;
            aggregate.mark_replayed(recorded.sequence);
            stats.events_applied += 1;
        }

        if stats.snapshot_version.is_none() && stats.events_applied == 0 {
            return Err(ReplayError::NotFound(stream_id.to_string()));
        }

        stats.version = aggregate.version();
        stats.duration_ms = start_time.elapsed().as_millis() as u64;
        debug!(
            stream_id,
            version = stats.version,
            snapshot_version = ?stats.snapshot_version,
            events_applied = stats.events_applied,
            "Rebuilt aggregate"
        );
        Ok((aggregate, stats))
    }

    /// Latest usable snapshot. Any problem with it means a full replay.
    async fn load_snapshot(&self, stream_id: &str) -> Option<(A, u64)> {
        if !self.log.config().use_snapshots {
            return None;
        }
        let store = self.snapshots.as_ref()?;
        let snapshot = match store.load_latest_snapshot(stream_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(stream_id, error = %e, "Ignoring unreadable snapshot");
                return None;
            }
        };
        match restore::<A>(stream_id, snapshot) {
            Ok(restored) => Some(restored),
            Err(e) => {
                warn!(stream_id, error = %e, "Ignoring unusable snapshot");
                None
            }
        }
    }
}

fn restore<A: Aggregate>(
    stream_id: &str,
    snapshot: AggregateSnapshot,
) -> Result<(A, u64), SnapshotError> {
    let mismatched = |found_stream: &str, found_type: &str| SnapshotError::Mismatched {
        expected: format!("{} {stream_id}", A::AGGREGATE_TYPE),
        found: format!("{found_type} {found_stream}"),
    };
    if snapshot.stream_id != stream_id || snapshot.aggregate_type != A::AGGREGATE_TYPE {
        return Err(mismatched(&snapshot.stream_id, &snapshot.aggregate_type));
    }
    let version = snapshot.version;
    let mut aggregate: A = serde_json::from_value(snapshot.state)?;
    if aggregate.stream_id() != stream_id {
        return Err(mismatched(aggregate.stream_id(), A::AGGREGATE_TYPE));
    }
    aggregate.mark_replayed(version);
    Ok((aggregate, version))
}

fn decode<A: Aggregate>(recorded: &RecordedEvent) -> Result<A::Event, ReplayError> {
    let corrupt = |reason: String| ReplayError::CorruptStream {
        stream_id: recorded.stream_id.clone(),
        sequence: recorded.sequence,
        reason,
    };
    let event: A::Event = recorded
        .decode()
        .map_err(|e| corrupt(format!("undecodable payload: {e}")))?;
    if event.event_type() != recorded.event_type {
        return Err(corrupt(format!(
            "payload is {} but stored type is {}",
            event.event_type(),
            recorded.event_type
        )));
    }
    Ok(event)
}
