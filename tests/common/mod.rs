// Copyright 2025 Cowboy AI, LLC.

//! Shared fixtures for ledger integration tests

#![allow(dead_code)]

use cim_ledger::{
    AggregateRebuilder, ChainVerifier, EventLog, InMemoryEventStorage, InMemorySnapshotStore,
    LedgerConfig, SnapshotStore, TransactionAggregate,
};
use rand::RngCore;
use std::sync::Arc;

pub struct TestLedger {
    pub storage: InMemoryEventStorage,
    pub snapshots: InMemorySnapshotStore,
    pub log: EventLog,
}

impl TestLedger {
    pub fn new(config: LedgerConfig) -> Self {
        let storage = InMemoryEventStorage::new();
        let log = EventLog::new(Arc::new(storage.clone()), random_verifier(), config);
        Self {
            storage,
            snapshots: InMemorySnapshotStore::new(),
            log,
        }
    }

    pub fn snapshot_store(&self) -> Arc<dyn SnapshotStore> {
        Arc::new(self.snapshots.clone())
    }

    pub fn rebuilder(&self) -> AggregateRebuilder<TransactionAggregate> {
        AggregateRebuilder::new(self.log.clone(), Some(self.snapshot_store()))
    }

    pub fn coordinator(&self) -> cim_ledger::CommitCoordinator {
        cim_ledger::CommitCoordinator::new(self.log.clone(), Some(self.snapshot_store()))
    }
}

pub fn random_verifier() -> ChainVerifier {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    ChainVerifier::new(&key).expect("non-empty key")
}
