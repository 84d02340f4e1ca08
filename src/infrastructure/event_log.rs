// Copyright 2025 Cowboy AI, LLC.

//! Event log: hash-chained, optimistic-concurrency appends and verified reads
//!
//! [`EventLog`] sits on top of an [`EventStorage`] medium. It assigns sequence
//! numbers, links every new event to its predecessor through the
//! [`ChainVerifier`], and checks the chain again while reading.
//!
//! ```mermaid
//! graph LR
//!     A[PendingEvent] -->|sequence + hash| B[EventLogTransaction]
//!     B -->|commit_batch| C[EventStorage]
//!     C -->|read_page| D[read_events]
//!     D -->|ChainCursor| E[RecordedEvent]
//! ```

use crate::config::LedgerConfig;
use crate::infrastructure::event_store::{
    EventStorage, EventStoreError, PendingEvent, RecordedEvent, StagedAppend, StreamHead,
};
use crate::infrastructure::integrity::{
    ChainCursor, ChainVerificationError, ChainVerifier, EventHash,
};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Ordered, lazily paginated feed of events from one stream
pub type EventStream = BoxStream<'static, Result<RecordedEvent, EventStoreError>>;

/// Result of auditing a whole stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAudit {
    /// Audited stream
    pub stream_id: String,
    /// Number of events whose hashes were recomputed
    pub events_verified: u64,
    /// Hash of the last event
    pub head_hash: EventHash,
}

/// Append-only, per-stream event log
#[derive(Debug, Clone)]
pub struct EventLog {
    storage: Arc<dyn EventStorage>,
    verifier: ChainVerifier,
    config: LedgerConfig,
}

impl EventLog {
    /// Create an event log over a storage medium
    pub fn new(storage: Arc<dyn EventStorage>, verifier: ChainVerifier, config: LedgerConfig) -> Self {
        Self {
            storage,
            verifier,
            config,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Verifier used to hash and check events
    pub fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    /// Current version of a stream (0 if it has no events)
    pub async fn stream_version(&self, stream_id: &str) -> Result<u64, EventStoreError> {
        Ok(self.storage.stream_head(stream_id).await?.version)
    }

    /// Append a batch to one stream, atomically.
    ///
    /// Fails with [`EventStoreError::ConcurrencyConflict`] unless the durable
    /// version equals `expected_version`. Returns the new stream version.
    pub async fn append_events(
        &self,
        stream_id: &str,
        pending: Vec<PendingEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError> {
        let mut transaction = self.begin_transaction();
        let version = transaction
            .append(stream_id, pending, expected_version)
            .await?;
        transaction.commit().await?;
        Ok(version)
    }

    /// Start a transaction that commits appends to any number of streams at once
    pub fn begin_transaction(&self) -> EventLogTransaction {
        EventLogTransaction {
            log: self.clone(),
            staged: Vec::new(),
            heads: HashMap::new(),
        }
    }

    /// Read events with sequence >= `from_version`, `batch_size` at a time.
    ///
    /// With `verify_chain_on_read` enabled every event is checked against the
    /// running hash before it is yielded; the stream ends right after the
    /// first [`EventStoreError::Integrity`] item.
    pub fn read_events(&self, stream_id: &str, from_version: u64, batch_size: usize) -> EventStream {
        let state = ReadState {
            storage: Arc::clone(&self.storage),
            verifier: self
                .config
                .verify_chain_on_read
                .then(|| self.verifier.clone()),
            stream_id: stream_id.to_string(),
            next: from_version.max(1),
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
            done: false,
        };
        stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
        .boxed()
    }

    /// Read a stream using the configured batch size
    pub fn read_stream(&self, stream_id: &str, from_version: u64) -> EventStream {
        self.read_events(stream_id, from_version, self.config.read_batch_size)
    }

    /// Recompute the hash of every event in a stream
    pub async fn verify_stream(&self, stream_id: &str) -> Result<ChainAudit, EventStoreError> {
        let mut cursor = ChainCursor::new(stream_id);
        let mut events = self.storage_pages(stream_id);
        while let Some(event) = events.try_next().await? {
            if let Err(e) = cursor.advance(&self.verifier, &event) {
                error!(stream_id, sequence = e.sequence(), "Hash chain verification failed");
                return Err(e.into());
            }
        }
        Ok(ChainAudit {
            stream_id: stream_id.to_string(),
            events_verified: cursor.version(),
            head_hash: cursor.head(),
        })
    }

    /// Unverified page walk, used by the audit so failures carry its own context
    fn storage_pages(&self, stream_id: &str) -> EventStream {
        let unverified = Self {
            config: self.config.clone().with_verify_chain_on_read(false),
            ..self.clone()
        };
        unverified.read_stream(stream_id, 1)
    }

    fn seal(&self, stream_id: &str, head: StreamHead, pending: Vec<PendingEvent>) -> Vec<RecordedEvent> {
        let mut previous = head.hash;
        pending
            .into_iter()
            .zip(head.version + 1..)
            .map(|(event, sequence)| {
                let hash = self.verifier.compute(
                    &previous,
                    stream_id,
                    sequence,
                    &event.event_type,
                    event.recorded_at,
                    &event.payload,
                );
                let recorded = RecordedEvent {
                    stream_id: stream_id.to_string(),
                    sequence,
                    event_type: event.event_type,
                    payload: event.payload,
                    recorded_at: event.recorded_at,
                    previous_hash: previous,
                    hash,
                };
                previous = hash;
                recorded
            })
            .collect()
    }
}

/// Appends staged against one or more streams, committed as one unit.
///
/// Dropping the transaction without committing discards everything staged.
#[derive(Debug)]
pub struct EventLogTransaction {
    log: EventLog,
    staged: Vec<StagedAppend>,
    heads: HashMap<String, StreamHead>,
}

impl EventLogTransaction {
    /// Stage an append. Returns the stream version it will produce.
    ///
    /// The expected version is checked now against the durable head (or the
    /// head left by an earlier append in this transaction) and again when
    /// the transaction commits.
    pub async fn append(
        &mut self,
        stream_id: &str,
        pending: Vec<PendingEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError> {
        let head = match self.heads.get(stream_id) {
            Some(head) => *head,
            None => self.log.storage.stream_head(stream_id).await?,
        };
        if head.version != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                current: head.version,
            });
        }
        if pending.is_empty() {
            return Ok(expected_version);
        }

        let events = self.log.seal(stream_id, head, pending);
        let staged = StagedAppend {
            stream_id: stream_id.to_string(),
            expected_version,
            events,
        };
        let new_version = staged.new_version();
        if let Some(last) = staged.events.last() {
            self.heads.insert(
                stream_id.to_string(),
                StreamHead {
                    version: last.sequence,
                    hash: last.hash,
                },
            );
        }
        debug!(
            stream_id,
            expected_version,
            version = new_version,
            "Staged append"
        );
        self.staged.push(staged);
        Ok(new_version)
    }

    /// Number of events staged so far
    pub fn staged_events(&self) -> usize {
        self.staged.iter().map(|s| s.events.len()).sum()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Durably apply every staged append, or none. Returns the number of events written.
    pub async fn commit(self) -> Result<usize, EventStoreError> {
        let total = self.staged_events();
        if total == 0 {
            return Ok(0);
        }
        let streams = self.staged.len();
        let timeout = self.log.config.append_timeout();
        match tokio::time::timeout(timeout, self.log.storage.commit_batch(self.staged)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EventStoreError::StorageUnavailable(format!(
                    "append did not complete within {}ms",
                    timeout.as_millis()
                )))
            }
        }
        info!(streams, events = total, "Committed event log transaction");
        Ok(total)
    }

    /// Discard everything staged
    pub fn rollback(self) {
        debug!(events = self.staged_events(), "Rolled back event log transaction");
    }
}

struct ReadState {
    storage: Arc<dyn EventStorage>,
    verifier: Option<ChainVerifier>,
    stream_id: String,
    next: u64,
    batch_size: usize,
    buffer: VecDeque<RecordedEvent>,
    cursor: Option<ChainCursor>,
    exhausted: bool,
    done: bool,
}

impl ReadState {
    fn fail(&mut self, err: EventStoreError) -> Option<Result<RecordedEvent, EventStoreError>> {
        self.done = true;
        Some(Err(err))
    }

    /// Position the cursor on the predecessor of the first requested event.
    ///
    /// Returns false only when the stream really ends before `next`. A
    /// predecessor that is missing, out of place or fails its own hash is an
    /// integrity error.
    async fn prime(&mut self, verifier: &ChainVerifier) -> Result<bool, EventStoreError> {
        if self.next == 1 {
            self.cursor = Some(ChainCursor::new(&self.stream_id));
            return Ok(true);
        }
        let boundary = self.next - 1;
        let predecessor = self.storage.read_page(&self.stream_id, boundary, 1).await?;
        let Some(event) = predecessor.first() else {
            let head = self.storage.stream_head(&self.stream_id).await?;
            if head.version < boundary {
                return Ok(false);
            }
            return Err(ChainVerificationError::SequenceGap {
                stream_id: self.stream_id.clone(),
                expected: boundary,
                found: head.version,
            }
            .into());
        };
        if event.sequence != boundary {
            return Err(ChainVerificationError::SequenceGap {
                stream_id: self.stream_id.clone(),
                expected: boundary,
                found: event.sequence,
            }
            .into());
        }
        if event.stream_id != self.stream_id || !verifier.verify(event, &event.previous_hash) {
            return Err(ChainVerificationError::HashMismatch {
                stream_id: self.stream_id.clone(),
                sequence: event.sequence,
            }
            .into());
        }
        self.cursor = Some(ChainCursor::resume(&self.stream_id, event.sequence, event.hash));
        Ok(true)
    }

    async fn next_item(&mut self) -> Option<Result<RecordedEvent, EventStoreError>> {
        if self.done {
            return None;
        }
        let unprimed = if self.cursor.is_none() {
            self.verifier.clone()
        } else {
            None
        };
        if let Some(verifier) = unprimed {
            match self.prime(&verifier).await {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    error!(
                        stream_id = %self.stream_id,
                        from = self.next,
                        error = %e,
                        "Cannot resume hash chain for read"
                    );
                    return self.fail(e);
                }
            }
        }
        if self.buffer.is_empty() {
            if self.exhausted {
                self.done = true;
                return None;
            }
            let page = match self
                .storage
                .read_page(&self.stream_id, self.next, self.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return self.fail(e),
            };
            debug!(
                stream_id = %self.stream_id,
                from = self.next,
                events = page.len(),
                "Read event page"
            );
            self.exhausted = page.len() < self.batch_size;
            self.buffer.extend(page);
        }

        let event = match self.buffer.pop_front() {
            Some(event) => event,
            None => {
                self.done = true;
                return None;
            }
        };
        if let (Some(verifier), Some(cursor)) = (self.verifier.as_ref(), self.cursor.as_mut()) {
            if let Err(e) = cursor.advance(verifier, &event) {
                error!(
                    stream_id = %self.stream_id,
                    sequence = e.sequence(),
                    "Hash chain verification failed on read"
                );
                return self.fail(e.into());
            }
        } else if event.sequence != self.next {
            return self.fail(
                ChainVerificationError::SequenceGap {
                    stream_id: self.stream_id.clone(),
                    expected: self.next,
                    found: event.sequence,
                }
                .into(),
            );
        }
        self.next = event.sequence + 1;
        Some(Ok(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryEventStorage;

    fn log_with(config: LedgerConfig) -> (EventLog, InMemoryEventStorage) {
        let storage = InMemoryEventStorage::new();
        let log = EventLog::new(
            Arc::new(storage.clone()),
            ChainVerifier::new(b"event-log-tests").unwrap(),
            config,
        );
        (log, storage)
    }

    fn pending(n: usize) -> Vec<PendingEvent> {
        (0..n)
            .map(|i| PendingEvent::new("Test", format!("{{\"i\":{i}}}")))
            .collect()
    }

    async fn collect(stream: EventStream) -> Vec<Result<RecordedEvent, EventStoreError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_append_assigns_contiguous_sequences() {
        let (log, _) = log_with(LedgerConfig::default());
        assert_eq!(log.append_events("T1", pending(2), 0).await.unwrap(), 2);
        assert_eq!(log.append_events("T1", pending(3), 2).await.unwrap(), 5);

        let events: Vec<_> = collect(log.read_events("T1", 1, 2))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(events[0].previous_hash.is_root());
        assert_eq!(events[3].previous_hash, events[2].hash);
    }

    #[tokio::test]
    async fn test_stale_expected_version_conflicts() {
        let (log, _) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(1), 0).await.unwrap();

        let err = log.append_events("T1", pending(1), 0).await.unwrap_err();
        assert_eq!(
            err,
            EventStoreError::ConcurrencyConflict {
                stream_id: "T1".to_string(),
                expected: 0,
                current: 1
            }
        );
        let err = log.append_events("T1", pending(1), 3).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(log.stream_version("T1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_from_middle_verifies_against_predecessor() {
        let (log, _) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(5), 0).await.unwrap();

        let events = collect(log.read_events("T1", 3, 1)).await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(Result::is_ok));
        assert!(collect(log.read_events("T1", 9, 4)).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_stops_at_first_tampered_event() {
        let (log, storage) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(4), 0).await.unwrap();
        assert!(storage.tamper("T1", 3, |e| e.payload = "{\"i\":42}".into()).await);

        let items = collect(log.read_events("T1", 1, 10)).await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(&items[2], Err(e) if e.is_integrity_error()));
    }

    #[tokio::test]
    async fn test_unverified_read_passes_tampered_event() {
        let (log, storage) = log_with(LedgerConfig::default().with_verify_chain_on_read(false));
        log.append_events("T1", pending(2), 0).await.unwrap();
        storage.tamper("T1", 2, |e| e.payload = "{}".into()).await;

        let items = collect(log.read_events("T1", 1, 10)).await;
        assert!(items.iter().all(Result::is_ok));
        assert!(log.verify_stream("T1").await.unwrap_err().is_integrity_error());
    }

    #[tokio::test]
    async fn test_verify_stream_reports_head() {
        let (log, _) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(3), 0).await.unwrap();
        let audit = log.verify_stream("T1").await.unwrap();
        assert_eq!(audit.events_verified, 3);
        assert!(!audit.head_hash.is_root());
    }

    #[tokio::test]
    async fn test_transaction_spans_streams_and_rolls_back() {
        let (log, storage) = log_with(LedgerConfig::default());

        let mut tx = log.begin_transaction();
        assert_eq!(tx.append("A", pending(1), 0).await.unwrap(), 1);
        assert_eq!(tx.append("A", pending(1), 1).await.unwrap(), 2);
        assert_eq!(tx.append("B", pending(2), 0).await.unwrap(), 2);
        assert_eq!(tx.staged_events(), 4);
        tx.rollback();
        assert_eq!(storage.event_count("A").await, 0);

        let mut tx = log.begin_transaction();
        tx.append("A", pending(1), 0).await.unwrap();
        tx.append("B", pending(2), 0).await.unwrap();
        assert_eq!(tx.commit().await.unwrap(), 3);
        assert_eq!(log.stream_version("A").await.unwrap(), 1);
        assert_eq!(log.stream_version("B").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_storage_unavailable_surfaces() {
        let (log, storage) = log_with(LedgerConfig::default());
        storage.set_available(false);
        let err = log.append_events("T1", pending(1), 0).await.unwrap_err();
        assert!(matches!(err, EventStoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_read_from_middle_rejects_displaced_predecessor() {
        let (log, storage) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(4), 0).await.unwrap();
        assert!(storage.tamper("T1", 2, |e| e.sequence += 100).await);

        let items = collect(log.read_events("T1", 3, 10)).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Err(EventStoreError::Integrity(ChainVerificationError::SequenceGap {
                expected: 2,
                found: 102,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_read_from_middle_rejects_tampered_predecessor() {
        let (log, storage) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(4), 0).await.unwrap();
        assert!(storage.tamper("T1", 2, |e| e.payload = "{\"i\":7}".into()).await);

        let items = collect(log.read_events("T1", 3, 10)).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Err(EventStoreError::Integrity(ChainVerificationError::HashMismatch {
                sequence: 2,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_read_past_head_is_empty() {
        let (log, _) = log_with(LedgerConfig::default());
        log.append_events("T1", pending(2), 0).await.unwrap();
        assert!(collect(log.read_events("T1", 3, 10)).await.is_empty());
        assert!(collect(log.read_events("T1", 4, 10)).await.is_empty());
    }

    #[derive(Debug)]
    struct SlowStorage {
        inner: InMemoryEventStorage,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl EventStorage for SlowStorage {
        async fn stream_head(&self, stream_id: &str) -> Result<StreamHead, EventStoreError> {
            self.inner.stream_head(stream_id).await
        }

        async fn read_page(
            &self,
            stream_id: &str,
            from_sequence: u64,
            limit: usize,
        ) -> Result<Vec<RecordedEvent>, EventStoreError> {
            self.inner.read_page(stream_id, from_sequence, limit).await
        }

        async fn commit_batch(&self, appends: Vec<StagedAppend>) -> Result<(), EventStoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.commit_batch(appends).await
        }
    }

    #[tokio::test]
    async fn test_append_past_timeout_is_storage_unavailable() {
        let inner = InMemoryEventStorage::new();
        let config = LedgerConfig {
            append_timeout_ms: 1,
            ..LedgerConfig::default()
        };
        let log = EventLog::new(
            Arc::new(SlowStorage {
                inner: inner.clone(),
                delay: std::time::Duration::from_millis(200),
            }),
            ChainVerifier::new(b"event-log-tests").unwrap(),
            config,
        );

        let err = log.append_events("T1", pending(2), 0).await.unwrap_err();
        assert!(matches!(err, EventStoreError::StorageUnavailable(_)));
        assert!(!err.is_retryable());

        // the abandoned commit never lands
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(log.stream_version("T1").await.unwrap(), 0);
        assert_eq!(inner.event_count("T1").await, 0);
    }

    #[tokio::test]
    async fn test_empty_append_is_a_version_check() {
        let (log, _) = log_with(LedgerConfig::default());
        assert_eq!(log.append_events("T1", Vec::new(), 0).await.unwrap(), 0);
        assert!(log.append_events("T1", Vec::new(), 1).await.is_err());
    }
}
