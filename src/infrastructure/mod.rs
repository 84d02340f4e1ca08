// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer for cim-ledger
//!
//! This module contains all storage concerns:
//! - Event log with hash-chained, optimistic appends
//! - Keyed hash chain and its verifier
//! - Snapshot storage (memory and JetStream KV)
//! - Snapshot policy
//! - Aggregate reconstruction from events

pub mod event_log;
/// Rebuilding aggregates from snapshots and events
pub mod event_replay;
pub mod event_store;
/// In-memory event storage
pub mod in_memory;
/// Keyed hash chain over stream events
pub mod integrity;
/// Automatic snapshot policies for performance optimization
pub mod snapshot_policy;
pub mod snapshot_store;

pub use event_log::{ChainAudit, EventLog, EventLogTransaction, EventStream};
pub use event_replay::{AggregateRebuilder, ReplayError, ReplayStats};
pub use event_store::{
    EventStorage, EventStoreError, PendingEvent, RecordedEvent, StagedAppend, StreamHead,
};
pub use in_memory::InMemoryEventStorage;
pub use integrity::{
    verify_event_chain, ChainCursor, ChainVerificationError, ChainVerifier, EnvKeyProvider,
    EventHash, KeyError, KeyProvider, StaticKeyProvider, HASH_KEY_ENV,
};
pub use snapshot_policy::SnapshotPolicy;
pub use snapshot_store::{
    AggregateSnapshot, InMemorySnapshotStore, JetStreamSnapshotStore, SnapshotError,
    SnapshotStore,
};
