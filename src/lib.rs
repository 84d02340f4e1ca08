// Copyright 2025 Cowboy AI, LLC.

//! # CIM Ledger
//!
//! Event-sourced, tamper-evident ledger of financial transfers.
//!
//! Every transfer is a stream of immutable events. Each event carries a keyed
//! hash over its fields and its predecessor's hash, so any change to stored
//! history is detected on read. Current state is never stored; it is rebuilt
//! from the latest snapshot plus the events after it.
//!
//! - **Integrity**: HMAC-SHA256 hash chain per stream
//! - **Event Log**: optimistic-concurrency appends, paginated verified reads,
//!   multi-stream atomic transactions
//! - **Snapshots**: periodic checkpoints bounding replay cost
//! - **Reconstruction**: snapshot plus subsequent events
//! - **Commit Coordinator**: all-or-nothing commits across aggregates
//! - **Transactions**: the transfer lifecycle state machine
//!
//! ## Design Principles
//!
//! 1. **Append-only**: events are never updated or deleted
//! 2. **Optimistic**: conflicts are detected by version comparison, never by locks
//! 3. **Atomic**: a commit lands on every stream or on none
//! 4. **Best-effort snapshots**: snapshot failures never fail a commit
//! 5. **Controlled State**: one transition table drives operations and replay
//!
//! ```no_run
//! use cim_ledger::{Ledger, LedgerConfig, StaticKeyProvider, TransactionCommand};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::in_memory(LedgerConfig::default(), &StaticKeyProvider::new(b"secret".to_vec()))?;
//! let ack = ledger
//!     .transactions()
//!     .handle(TransactionCommand::Initiate {
//!         transaction_id: "T1".into(),
//!         amount: 100,
//!         currency: "USD".into(),
//!         source_account: "acc-a".into(),
//!         destination_account: "acc-b".into(),
//!     })
//!     .await?;
//! assert_eq!(ack.version, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod ledger;
pub mod persistence;
pub mod transaction;

pub use aggregate::{Aggregate, DomainEvent, TransitionError};
pub use config::{ConfigError, LedgerConfig};
pub use errors::{DomainError, DomainResult};
pub use infrastructure::{
    AggregateRebuilder, AggregateSnapshot, ChainAudit, ChainVerificationError, ChainVerifier,
    EnvKeyProvider, EventHash, EventLog, EventStorage, EventStoreError, InMemoryEventStorage,
    InMemorySnapshotStore, JetStreamSnapshotStore, KeyError, KeyProvider, PendingEvent,
    RecordedEvent, ReplayError, ReplayStats, SnapshotError, SnapshotPolicy, SnapshotStore,
    StaticKeyProvider,
};
pub use ledger::{Ledger, LedgerError};
pub use persistence::{CommitCoordinator, CommitError};
pub use transaction::{
    AuthorizationOutcome, CommandAcknowledgment, CommandError, CommandKind, SettlementOutcome,
    TransactionAggregate, TransactionCommand, TransactionCommandHandler, TransactionEvent,
    TransactionStatus,
};
