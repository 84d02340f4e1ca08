// Copyright 2025 Cowboy AI, LLC.

//! Unit of work over event-sourced aggregates
//!
//! The coordinator collects aggregates that buffered events and appends all
//! of their buffers through one [`EventLogTransaction`], so a commit either
//! lands on every stream or on none of them.
//!
//! ```mermaid
//! sequenceDiagram
//!     participant C as Caller
//!     participant K as CommitCoordinator
//!     participant L as EventLog
//!     C->>K: track(aggregate)
//!     C->>K: commit_async()
//!     K->>L: append per stream (staged)
//!     K->>L: commit (one batch)
//!     K->>C: committed event count
//!     K-->>K: snapshots (best effort)
//! ```

use crate::aggregate::{Aggregate, DomainEvent};
use crate::infrastructure::{
    AggregateSnapshot, EventLog, EventLogTransaction, EventStoreError, PendingEvent,
    SnapshotPolicy, SnapshotStore,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised while committing tracked aggregates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// The event log rejected the batch; nothing was written
    #[error("Commit failed: {0}")]
    Store(#[from] EventStoreError),

    /// `begin_transaction` was called while one is open
    #[error("A transaction is already open")]
    TransactionAlreadyOpen,

    /// `commit` or `rollback` was called without an open transaction
    #[error("No transaction is open")]
    NoTransaction,
}

impl CommitError {
    /// Check if a stale expected version caused the failure
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, CommitError::Store(e) if e.is_concurrency_conflict())
    }

    /// Whether reloading the aggregates and retrying may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommitError::Store(e) if e.is_retryable())
    }
}

/// Events of one aggregate, ready to stage
struct PreparedAppend {
    stream_id: String,
    expected_version: u64,
    durable_version: u64,
    events: Vec<PendingEvent>,
}

#[async_trait]
trait TrackedAggregate: Send + Sync {
    /// Buffered events after the first `skip`, or `None` if there are none
    async fn prepare(&self, skip: usize) -> Result<Option<PreparedAppend>, EventStoreError>;

    /// Mark events up to `version` durable; capture a snapshot if asked and
    /// the state holds nothing uncommitted
    async fn confirm(&self, version: u64, capture: bool) -> Option<AggregateSnapshot>;
}

struct Handle<A: Aggregate>(Arc<Mutex<A>>);

#[async_trait]
impl<A: Aggregate> TrackedAggregate for Handle<A> {
    async fn prepare(&self, skip: usize) -> Result<Option<PreparedAppend>, EventStoreError> {
        let aggregate = self.0.lock().await;
        let buffered = aggregate.pending_events();
        if buffered.len() <= skip {
            return Ok(None);
        }
        let events = buffered[skip..]
            .iter()
            .map(DomainEvent::to_pending)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(PreparedAppend {
            stream_id: aggregate.stream_id().to_string(),
            expected_version: aggregate.durable_version() + skip as u64,
            durable_version: aggregate.durable_version(),
            events,
        }))
    }

    async fn confirm(&self, version: u64, capture: bool) -> Option<AggregateSnapshot> {
        let mut aggregate = self.0.lock().await;
        aggregate.mark_committed(version);
        if !capture || aggregate.version() != version {
            return None;
        }
        match serde_json::to_value(&*aggregate) {
            Ok(state) => Some(AggregateSnapshot::capture(
                aggregate.stream_id(),
                A::AGGREGATE_TYPE,
                version,
                state,
            )),
            Err(e) => {
                warn!(
                    stream_id = aggregate.stream_id(),
                    error = %e,
                    "Could not serialize aggregate for snapshot"
                );
                None
            }
        }
    }
}

/// Stream versions moved by staged appends, per tracked aggregate
struct OpenBatch {
    log: EventLogTransaction,
    moved: IndexMap<usize, (u64, u64)>,
}

impl OpenBatch {
    fn new(log: EventLogTransaction) -> Self {
        Self {
            log,
            moved: IndexMap::new(),
        }
    }

    fn staged_for(&self, key: usize) -> usize {
        self.moved
            .get(&key)
            .map_or(0, |(durable, staged)| (staged - durable) as usize)
    }
}

/// Commits buffered events of tracked aggregates as one atomic batch
pub struct CommitCoordinator {
    log: EventLog,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    policy: SnapshotPolicy,
    tracked: IndexMap<usize, Arc<dyn TrackedAggregate>>,
    transaction: Option<OpenBatch>,
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("policy", &self.policy)
            .field("tracked", &self.tracked.len())
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl CommitCoordinator {
    /// Create a coordinator. The snapshot policy follows the log's configuration.
    pub fn new(log: EventLog, snapshots: Option<Arc<dyn SnapshotStore>>) -> Self {
        let policy = SnapshotPolicy::from_config(log.config());
        Self {
            log,
            snapshots,
            policy,
            tracked: IndexMap::new(),
            transaction: None,
        }
    }

    /// Replace the snapshot policy
    pub fn with_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register an aggregate for the next commit.
    ///
    /// Tracking the same handle again is a no-op. The coordinator locks the
    /// aggregate while committing, so callers must not hold the lock across
    /// a commit.
    pub fn track<A: Aggregate>(&mut self, aggregate: &Arc<Mutex<A>>) {
        let key = Arc::as_ptr(aggregate) as *const () as usize;
        self.tracked.entry(key).or_insert_with(|| -> Arc<dyn TrackedAggregate> {
            Arc::new(Handle(Arc::clone(aggregate)))
        });
    }

    /// Number of tracked aggregates
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Whether an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Append the buffered events of every tracked aggregate.
    ///
    /// Outside an explicit transaction the batch is committed at once: on
    /// success every buffer is cleared and the tracked set emptied; on
    /// failure nothing is written and buffers stay as they were. Inside a
    /// transaction the events are only staged and the return value counts
    /// staged events.
    pub async fn commit_async(&mut self) -> Result<usize, CommitError> {
        if let Some(open) = self.transaction.as_mut() {
            return match stage(&self.tracked, open).await {
                Ok(staged) => Ok(staged),
                Err(e) => {
                    if let Some(open) = self.transaction.take() {
                        open.log.rollback();
                    }
                    warn!(error = %e, "Staging failed; transaction aborted");
                    Err(e)
                }
            };
        }

        let mut batch = OpenBatch::new(self.log.begin_transaction());
        stage(&self.tracked, &mut batch).await?;
        self.finish(batch).await
    }

    /// Open an explicit transaction spanning several `commit_async` calls
    pub fn begin_transaction(&mut self) -> Result<(), CommitError> {
        if self.transaction.is_some() {
            return Err(CommitError::TransactionAlreadyOpen);
        }
        self.transaction = Some(OpenBatch::new(self.log.begin_transaction()));
        debug!("Opened commit transaction");
        Ok(())
    }

    /// Stage anything still buffered and commit the open transaction
    pub async fn commit(&mut self) -> Result<usize, CommitError> {
        let mut batch = self.transaction.take().ok_or(CommitError::NoTransaction)?;
        stage(&self.tracked, &mut batch).await?;
        self.finish(batch).await
    }

    /// Discard the open transaction and forget every tracked aggregate.
    ///
    /// Returns the number of staged events dropped. The aggregates keep
    /// their buffers and should be discarded by the caller.
    pub fn rollback(&mut self) -> Result<usize, CommitError> {
        let batch = self.transaction.take().ok_or(CommitError::NoTransaction)?;
        let dropped = batch.log.staged_events();
        batch.log.rollback();
        self.tracked.clear();
        Ok(dropped)
    }

    async fn finish(&mut self, batch: OpenBatch) -> Result<usize, CommitError> {
        let OpenBatch { log, moved } = batch;
        let committed = log.commit().await?;
        let tracked = std::mem::take(&mut self.tracked);

        for (key, (previous, version)) in moved {
            let Some(handle) = tracked.get(&key) else {
                continue;
            };
            let capture =
                self.snapshots.is_some() && self.policy.should_snapshot(previous, version);
            if let Some(snapshot) = handle.confirm(version, capture).await {
                self.save_snapshot(snapshot).await;
            }
        }

        info!(
            aggregates = tracked.len(),
            events = committed,
            "Committed tracked aggregates"
        );
        Ok(committed)
    }

    /// Snapshot writes never fail a commit
    async fn save_snapshot(&self, snapshot: AggregateSnapshot) {
        let Some(store) = self.snapshots.as_ref() else {
            return;
        };
        let stream_id = snapshot.stream_id.clone();
        let version = snapshot.version;
        match store.save_snapshot(snapshot).await {
            Ok(()) => debug!(stream_id, version, "Snapshot written"),
            Err(e) => warn!(stream_id, version, error = %e, "Snapshot write failed"),
        }
    }
}

async fn stage(
    tracked: &IndexMap<usize, Arc<dyn TrackedAggregate>>,
    batch: &mut OpenBatch,
) -> Result<usize, CommitError> {
    let mut staged = 0;
    for (key, handle) in tracked {
        let Some(prepared) = handle.prepare(batch.staged_for(*key)).await? else {
            continue;
        };
        let count = prepared.events.len();
        let version = batch
            .log
            .append(&prepared.stream_id, prepared.events, prepared.expected_version)
            .await?;
        batch
            .moved
            .entry(*key)
            .and_modify(|(_, v)| *v = version)
            .or_insert((prepared.durable_version, version));
        staged += count;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::infrastructure::{ChainVerifier, InMemoryEventStorage, InMemorySnapshotStore};
    use crate::transaction::{AuthorizationOutcome, TransactionAggregate, TransactionStatus};

    struct Fixture {
        log: EventLog,
        storage: InMemoryEventStorage,
        snapshots: InMemorySnapshotStore,
    }

    fn fixture(config: LedgerConfig) -> Fixture {
        let storage = InMemoryEventStorage::new();
        let log = EventLog::new(
            Arc::new(storage.clone()),
            ChainVerifier::new(b"coordinator-tests").unwrap(),
            config,
        );
        Fixture {
            log,
            storage,
            snapshots: InMemorySnapshotStore::new(),
        }
    }

    impl Fixture {
        fn coordinator(&self) -> CommitCoordinator {
            CommitCoordinator::new(self.log.clone(), Some(Arc::new(self.snapshots.clone())))
        }
    }

    fn initiated(id: &str) -> Arc<Mutex<TransactionAggregate>> {
        let mut tx = TransactionAggregate::blank(id);
        tx.initiate(100, "USD", "acc-a", "acc-b").unwrap();
        Arc::new(Mutex::new(tx))
    }

    fn approved() -> AuthorizationOutcome {
        AuthorizationOutcome::Approved {
            authorization_code: "AUTH".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commit_clears_buffers_and_tracked_set() {
        let f = fixture(LedgerConfig::default());
        let a = initiated("A");
        a.lock().await.authorize(approved()).unwrap();
        let b = initiated("B");

        let mut coordinator = f.coordinator();
        coordinator.track(&a);
        coordinator.track(&a);
        coordinator.track(&b);
        assert_eq!(coordinator.tracked_count(), 2);

        assert_eq!(coordinator.commit_async().await.unwrap(), 3);
        assert_eq!(coordinator.tracked_count(), 0);
        assert!(!a.lock().await.has_pending());
        assert_eq!(a.lock().await.durable_version(), 2);
        assert_eq!(f.storage.event_count("B").await, 1);

        // buffers were cleared, so nothing is committed twice
        coordinator.track(&a);
        assert_eq!(coordinator.commit_async().await.unwrap(), 0);
        assert_eq!(f.storage.event_count("A").await, 2);
    }

    #[tokio::test]
    async fn test_stale_aggregate_aborts_whole_batch() {
        let f = fixture(LedgerConfig::default());
        f.log
            .append_events("B", vec![PendingEvent::new("Other", "{}")], 0)
            .await
            .unwrap();

        let a = initiated("A");
        let b = initiated("B");
        let mut coordinator = f.coordinator();
        coordinator.track(&a);
        coordinator.track(&b);

        let err = coordinator.commit_async().await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(f.storage.event_count("A").await, 0);
        assert_eq!(f.storage.event_count("B").await, 1);
        assert_eq!(a.lock().await.pending_events().len(), 1);
        assert_eq!(coordinator.tracked_count(), 2);
    }

    #[tokio::test]
    async fn test_conflict_after_several_buffered_operations() {
        let f = fixture(LedgerConfig::default());
        let a = initiated("A");
        let mut coordinator = f.coordinator();
        coordinator.track(&a);
        coordinator.commit_async().await.unwrap();

        // another writer moves the stream while this instance keeps buffering
        f.log
            .append_events("A", vec![PendingEvent::new("Other", "{}")], 1)
            .await
            .unwrap();
        {
            let mut tx = a.lock().await;
            tx.authorize(approved()).unwrap();
            tx.dispute("suspicious").unwrap();
        }
        coordinator.track(&a);
        let err = coordinator.commit_async().await.unwrap_err();
        assert!(err.is_concurrency_conflict());
    }

    #[tokio::test]
    async fn test_snapshot_written_at_threshold() {
        let f = fixture(LedgerConfig::default().with_snapshot_threshold(2));
        let a = initiated("A");
        let mut coordinator = f.coordinator();
        coordinator.track(&a);
        coordinator.commit_async().await.unwrap();
        assert!(f.snapshots.is_empty().await);

        a.lock().await.authorize(approved()).unwrap();
        coordinator.track(&a);
        coordinator.commit_async().await.unwrap();

        let snapshot = f.snapshots.load_latest_snapshot("A").await.unwrap().unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.aggregate_type, "Transaction");
        let state: TransactionAggregate = serde_json::from_value(snapshot.state).unwrap();
        assert_eq!(state.status(), Some(TransactionStatus::Authorized));
    }

    #[tokio::test]
    async fn test_explicit_transaction_commits_on_commit_only() {
        let f = fixture(LedgerConfig::default());
        let a = initiated("A");
        let b = initiated("B");
        let mut coordinator = f.coordinator();

        coordinator.begin_transaction().unwrap();
        assert_eq!(
            coordinator.begin_transaction(),
            Err(CommitError::TransactionAlreadyOpen)
        );
        coordinator.track(&a);
        assert_eq!(coordinator.commit_async().await.unwrap(), 1);
        assert_eq!(f.storage.event_count("A").await, 0);

        // more events on an already staged aggregate are staged once
        a.lock().await.authorize(approved()).unwrap();
        coordinator.track(&b);
        assert_eq!(coordinator.commit_async().await.unwrap(), 2);

        assert_eq!(coordinator.commit().await.unwrap(), 3);
        assert!(!coordinator.in_transaction());
        assert_eq!(f.storage.event_count("A").await, 2);
        assert_eq!(f.storage.event_count("B").await, 1);
        assert!(!a.lock().await.has_pending());
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_events() {
        let f = fixture(LedgerConfig::default());
        let a = initiated("A");
        let mut coordinator = f.coordinator();

        assert_eq!(coordinator.rollback(), Err(CommitError::NoTransaction));
        coordinator.begin_transaction().unwrap();
        coordinator.track(&a);
        coordinator.commit_async().await.unwrap();
        assert_eq!(coordinator.rollback().unwrap(), 1);

        assert_eq!(f.storage.event_count("A").await, 0);
        assert_eq!(coordinator.tracked_count(), 0);
        assert!(a.lock().await.has_pending());
        assert_eq!(coordinator.commit().await, Err(CommitError::NoTransaction));
    }

    #[tokio::test]
    async fn test_storage_outage_is_not_retryable() {
        let f = fixture(LedgerConfig::default());
        f.storage.set_available(false);
        let a = initiated("A");
        let mut coordinator = f.coordinator();
        coordinator.track(&a);

        let err = coordinator.commit_async().await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(
            err,
            CommitError::Store(EventStoreError::StorageUnavailable(_))
        ));
        assert!(a.lock().await.has_pending());
    }
}
