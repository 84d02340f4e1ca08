// Copyright 2025 Cowboy AI, LLC.

//! Event-sourced aggregate contract
//!
//! An aggregate is an in-memory projection over one stream. It is never
//! persisted directly: it is rebuilt by replaying events (optionally on top
//! of a snapshot), and it buffers the events its domain operations produce
//! until a [`CommitCoordinator`](crate::persistence::CommitCoordinator)
//! appends them.

use crate::infrastructure::{EventStoreError, PendingEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// An event the current state cannot accept
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event {event_type} is not valid in state {state}")]
pub struct TransitionError {
    /// Name of the state the aggregate was in
    pub state: String,
    /// Type tag of the rejected event
    pub event_type: String,
}

impl TransitionError {
    /// Create a transition error
    pub fn new(state: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            event_type: event_type.into(),
        }
    }
}

/// A fact produced by an aggregate
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Type tag stored alongside the payload
    fn event_type(&self) -> &'static str;

    /// Serialize into a pending event for the log
    fn to_pending(&self) -> Result<PendingEvent, EventStoreError> {
        PendingEvent::from_fact(self.event_type(), self)
    }
}

/// State rebuilt from a stream.
///
/// Serialization covers domain state only; version bookkeeping and the
/// pending buffer are restored by the reconstructor.
pub trait Aggregate: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Events this aggregate produces and consumes
    type Event: DomainEvent;

    /// Type name recorded in snapshots
    const AGGREGATE_TYPE: &'static str;

    /// State of a stream before its first event
    fn blank(stream_id: &str) -> Self;

    /// Stream this aggregate projects
    fn stream_id(&self) -> &str;

    /// Pure state transition. Must not touch the pending buffer or versions.
    fn apply(&mut self, event: &Self::Event) -> Result<(), TransitionError>;

    /// Version including buffered events
    fn version(&self) -> u64;

    /// Last version confirmed durable (at load or last commit)
    fn durable_version(&self) -> u64;

    /// Events produced since the last durable version
    fn pending_events(&self) -> &[Self::Event];

    /// Set both versions after replaying up to `version`
    fn mark_replayed(&mut self, version: u64);

    /// Record that the log now holds events up to `version`, dropping the
    /// buffered events that commit covered
    fn mark_committed(&mut self, version: u64);

    /// Whether there is anything to commit
    fn has_pending(&self) -> bool {
        !self.pending_events().is_empty()
    }
}
