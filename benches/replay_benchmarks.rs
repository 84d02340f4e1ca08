// Copyright 2025 Cowboy AI, LLC.

//! Replay cost with and without snapshots

use cim_ledger::{
    Aggregate, AggregateRebuilder, ChainVerifier, CommitCoordinator, DomainEvent, EventLog,
    InMemoryEventStorage, InMemorySnapshotStore, LedgerConfig, SnapshotStore, TransitionError,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deposited {
    amount: u64,
}

impl DomainEvent for Deposited {
    fn event_type(&self) -> &'static str {
        "Deposited"
    }
}

/// Running balance; unbounded streams make replay cost visible
#[derive(Debug, Serialize, Deserialize)]
struct Balance {
    id: String,
    total: u64,
    #[serde(skip)]
    version: u64,
    #[serde(skip)]
    durable_version: u64,
    #[serde(skip)]
    pending: Vec<Deposited>,
}

impl Aggregate for Balance {
    type Event = Deposited;

    const AGGREGATE_TYPE: &'static str = "Balance";

    fn blank(stream_id: &str) -> Self {
        Self {
            id: stream_id.to_string(),
            total: 0,
            version: 0,
            durable_version: 0,
            pending: Vec::new(),
        }
    }

    fn stream_id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, event: &Deposited) -> Result<(), TransitionError> {
        self.total = self
            .total
            .checked_add(event.amount)
            .ok_or_else(|| TransitionError::new("Overflowing", event.event_type()))?;
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn durable_version(&self) -> u64 {
        self.durable_version
    }

    fn pending_events(&self) -> &[Deposited] {
        &self.pending
    }

    fn mark_replayed(&mut self, version: u64) {
        self.version = version;
        self.durable_version = version;
    }

    fn mark_committed(&mut self, version: u64) {
        let committed = version.saturating_sub(self.durable_version) as usize;
        self.pending.drain(..committed.min(self.pending.len()));
        self.durable_version = version;
        self.version = self.version.max(version);
    }
}

fn setup_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn build(rt: &Runtime, events: u64, config: LedgerConfig) -> AggregateRebuilder<Balance> {
    let log = EventLog::new(
        Arc::new(InMemoryEventStorage::new()),
        ChainVerifier::new(b"bench").unwrap(),
        config,
    );
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());

    rt.block_on(async {
        let handle = Arc::new(Mutex::new(Balance::blank("B1")));
        let mut coordinator = CommitCoordinator::new(log.clone(), Some(Arc::clone(&snapshots)));
        for chunk in 0..events / 10 {
            {
                let mut balance = handle.lock().await;
                for _ in 0..10 {
                    let event = Deposited { amount: chunk + 1 };
                    balance.apply(&event).unwrap();
                    balance.pending.push(event);
                    balance.version += 1;
                }
            }
            coordinator.track(&handle);
            coordinator.commit_async().await.unwrap();
        }
    });

    AggregateRebuilder::new(log, Some(snapshots))
}

fn benchmark_rebuild(c: &mut Criterion) {
    let rt = setup_runtime();
    let mut group = c.benchmark_group("rebuild");

    for events in [100u64, 1_000, 5_000] {
        let full = build(&rt, events, LedgerConfig::default().with_snapshots(false));
        let snapshotted = build(&rt, events, LedgerConfig::default().with_snapshot_threshold(100));

        group.bench_with_input(BenchmarkId::new("full_replay", events), &events, |b, _| {
            b.iter(|| rt.block_on(async { black_box(full.rebuild("B1").await.unwrap()) }));
        });
        group.bench_with_input(BenchmarkId::new("from_snapshot", events), &events, |b, _| {
            b.iter(|| rt.block_on(async { black_box(snapshotted.rebuild("B1").await.unwrap()) }));
        });
    }

    group.finish();
}

fn benchmark_unverified_read(c: &mut Criterion) {
    let rt = setup_runtime();
    let verified = build(&rt, 1_000, LedgerConfig::default().with_snapshots(false));
    let unverified = build(
        &rt,
        1_000,
        LedgerConfig::default()
            .with_snapshots(false)
            .with_verify_chain_on_read(false),
    );

    let mut group = c.benchmark_group("chain_verification");
    group.bench_function("verified", |b| {
        b.iter(|| rt.block_on(async { black_box(verified.rebuild("B1").await.unwrap()) }));
    });
    group.bench_function("unverified", |b| {
        b.iter(|| rt.block_on(async { black_box(unverified.rebuild("B1").await.unwrap()) }));
    });
    group.finish();
}

criterion_group!(benches, benchmark_rebuild, benchmark_unverified_read);
criterion_main!(benches);
