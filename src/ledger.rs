// Copyright 2025 Cowboy AI, LLC.

//! Wiring for a complete ledger
//!
//! [`Ledger`] owns the event log and the optional snapshot store and hands
//! out the services built on them.

use crate::aggregate::Aggregate;
use crate::config::{ConfigError, LedgerConfig};
use crate::infrastructure::{
    AggregateRebuilder, ChainVerifier, EventLog, EventStorage, InMemoryEventStorage,
    InMemorySnapshotStore, KeyError, KeyProvider, SnapshotStore,
};
use crate::persistence::CommitCoordinator;
use crate::transaction::TransactionCommandHandler;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while assembling a ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No usable hash key
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Event log, snapshot store and the services over them
#[derive(Clone)]
pub struct Ledger {
    log: EventLog,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("log", &self.log)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl Ledger {
    /// Assemble a ledger over any storage medium
    pub fn new(
        storage: Arc<dyn EventStorage>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        keys: &dyn KeyProvider,
        config: LedgerConfig,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        let verifier = ChainVerifier::from_provider(keys)?;
        info!(
            verify_chain_on_read = config.verify_chain_on_read,
            use_snapshots = config.use_snapshots,
            snapshot_threshold = config.snapshot_threshold,
            "Ledger assembled"
        );
        Ok(Self {
            log: EventLog::new(storage, verifier, config),
            snapshots,
        })
    }

    /// Ledger held entirely in memory
    pub fn in_memory(config: LedgerConfig, keys: &dyn KeyProvider) -> Result<Self, LedgerError> {
        Self::new(
            Arc::new(InMemoryEventStorage::new()),
            Some(Arc::new(InMemorySnapshotStore::new())),
            keys,
            config,
        )
    }

    /// The underlying event log
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The snapshot store, if any
    pub fn snapshots(&self) -> Option<&Arc<dyn SnapshotStore>> {
        self.snapshots.as_ref()
    }

    /// Reconstructor for aggregates of type `A`
    pub fn rebuilder<A: Aggregate>(&self) -> AggregateRebuilder<A> {
        AggregateRebuilder::new(self.log.clone(), self.snapshots.clone())
    }

    /// A fresh unit of work
    pub fn coordinator(&self) -> CommitCoordinator {
        CommitCoordinator::new(self.log.clone(), self.snapshots.clone())
    }

    /// Command handler for transactions
    pub fn transactions(&self) -> TransactionCommandHandler {
        TransactionCommandHandler::new(self.log.clone(), self.snapshots.clone())
    }
}
