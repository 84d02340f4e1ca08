// Copyright 2025 Cowboy AI, LLC.

//! Integration tests for JetStreamSnapshotStore
//!
//! These tests require a running NATS server with JetStream enabled.
//! Run with: `nats-server -js`, then `cargo test -- --ignored`

use cim_ledger::{AggregateSnapshot, JetStreamSnapshotStore, SnapshotStore};
use serde_json::json;
use uuid::Uuid;

async fn create_test_store() -> JetStreamSnapshotStore {
    let client = async_nats::connect("nats://localhost:4222").await.unwrap();
    let jetstream = async_nats::jetstream::new(client);
    let bucket = format!("test-snapshots-{}", Uuid::new_v4().simple());
    JetStreamSnapshotStore::new(&jetstream, &bucket).await.unwrap()
}

#[tokio::test]
#[ignore] // Requires NATS server to be running
async fn test_jetstream_snapshot_roundtrip_keeps_newest() {
    let store = create_test_store().await;

    let first = AggregateSnapshot::capture("tx/1", "Transaction", 2, json!({ "amount": 100 }));
    store.save_snapshot(first.clone()).await.unwrap();
    let loaded = store.load_latest_snapshot("tx/1").await.unwrap().unwrap();
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.state, first.state);

    let newer = AggregateSnapshot::capture("tx/1", "Transaction", 4, json!({ "amount": 100, "v": 4 }));
    store.save_snapshot(newer).await.unwrap();
    let older = AggregateSnapshot::capture("tx/1", "Transaction", 3, json!({ "amount": 0 }));
    store.save_snapshot(older).await.unwrap();

    let current = store.load_latest_snapshot("tx/1").await.unwrap().unwrap();
    assert_eq!(current.version, 4);
    assert!(store.load_latest_snapshot("tx/2").await.unwrap().is_none());
}
