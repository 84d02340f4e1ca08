// Copyright 2025 Cowboy AI, LLC.

//! Example walking a transfer through its lifecycle
//!
//! This example shows:
//! - Handling commands against an in-memory ledger
//! - Rebuilding state from snapshot plus events
//! - Atomic commits across two transfers
//! - Auditing the hash chain and detecting a rejected transition

use anyhow::{Context, Result};
use cim_ledger::{
    Aggregate, AuthorizationOutcome, Ledger, LedgerConfig, SettlementOutcome, StaticKeyProvider,
    TransactionAggregate, TransactionCommand,
};
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    let keys = StaticKeyProvider::new(b"demo-only-secret".to_vec());
    let config = LedgerConfig::default().with_snapshot_threshold(2);
    let ledger = Ledger::in_memory(config, &keys)?;
    let handler = ledger.transactions();

    println!("== Initiate, authorize and settle T1 ==");
    for command in [
        TransactionCommand::Initiate {
            transaction_id: "T1".into(),
            amount: 12_500,
            currency: "USD".into(),
            source_account: "acc-alice".into(),
            destination_account: "acc-bob".into(),
        },
        TransactionCommand::Authorize {
            transaction_id: "T1".into(),
            outcome: AuthorizationOutcome::Approved {
                authorization_code: "AUTH-7781".into(),
            },
        },
        TransactionCommand::Settle {
            transaction_id: "T1".into(),
            outcome: SettlementOutcome::Settled {
                settlement_reference: "SET-0042".into(),
            },
        },
    ] {
        let ack = handler.handle(command).await?;
        println!("  {:?} -> version {}", ack.kind, ack.version);
    }

    let (t1, stats) = ledger
        .rebuilder::<TransactionAggregate>()
        .rebuild_with_stats("T1")
        .await?;
    println!(
        "  T1 is {:?}, rebuilt from snapshot {:?} plus {} event(s)",
        t1.status(),
        stats.snapshot_version,
        stats.events_applied
    );

    println!("== Rejected transition ==");
    let again = handler
        .handle(TransactionCommand::Authorize {
            transaction_id: "T1".into(),
            outcome: AuthorizationOutcome::Approved {
                authorization_code: "AUTH-again".into(),
            },
        })
        .await;
    match again {
        Ok(ack) => anyhow::bail!("completed transfer accepted a new authorization: {ack:?}"),
        Err(err) => println!("  {err}"),
    }

    println!("== Two transfers in one commit ==");
    let mut t2 = TransactionAggregate::blank("T2");
    t2.initiate(900, "EUR", "acc-carol", "acc-dave")?;
    let mut t3 = TransactionAggregate::blank("T3");
    t3.initiate(50, "GBP", "acc-erin", "acc-frank")?;
    let (t2, t3) = (Arc::new(Mutex::new(t2)), Arc::new(Mutex::new(t3)));

    let mut coordinator = ledger.coordinator();
    coordinator.track(&t2);
    coordinator.track(&t3);
    let committed = coordinator.commit_async().await?;
    println!(
        "  committed {committed} event(s); T2 at version {}, T3 at version {}",
        t2.lock().await.version(),
        t3.lock().await.version()
    );

    println!("== Audit ==");
    for stream in ["T1", "T2", "T3"] {
        let audit = ledger
            .log()
            .verify_stream(stream)
            .await
            .with_context(|| format!("auditing {stream}"))?;
        println!(
            "  {stream}: {} event(s), head {}",
            audit.events_verified, audit.head_hash
        );
    }

    Ok(())
}
