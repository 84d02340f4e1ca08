// Copyright 2025 Cowboy AI, LLC.

//! In-process event storage: an arena of append-only streams

use crate::infrastructure::event_store::{
    EventStorage, EventStoreError, RecordedEvent, StagedAppend, StreamHead,
};
use crate::infrastructure::integrity::ChainVerificationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Event storage held in memory.
///
/// Streams are independent `Vec`s keyed by stream id. A batch commit takes
/// the write lock once, validates every append against the current heads and
/// only then mutates, so a batch is applied entirely or not at all and a
/// cancelled commit leaves nothing behind.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStorage {
    streams: Arc<RwLock<HashMap<String, Vec<RecordedEvent>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the medium going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of events stored for a stream
    pub async fn event_count(&self, stream_id: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map_or(0, Vec::len)
    }

    /// Rewrite a stored event in place, bypassing every check.
    ///
    /// Exists to exercise tamper detection; returns false when no such event
    /// is stored.
    pub async fn tamper<F>(&self, stream_id: &str, sequence: u64, mutate: F) -> bool
    where
        F: FnOnce(&mut RecordedEvent),
    {
        let mut streams = self.streams.write().await;
        let Some(event) = streams
            .get_mut(stream_id)
            .and_then(|events| events.iter_mut().find(|e| e.sequence == sequence))
        else {
            return false;
        };
        mutate(event);
        true
    }

    fn ensure_available(&self) -> Result<(), EventStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::StorageUnavailable(
                "in-memory storage marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn head_of(events: Option<&Vec<RecordedEvent>>) -> StreamHead {
    events
        .and_then(|events| events.last())
        .map_or(StreamHead::EMPTY, |last| StreamHead {
            version: last.sequence,
            hash: last.hash,
        })
}

fn check_linkage(head: StreamHead, append: &StagedAppend) -> Result<StreamHead, EventStoreError> {
    let mut running = head;
    for event in &append.events {
        if event.stream_id != append.stream_id || event.sequence != running.version + 1 {
            return Err(ChainVerificationError::SequenceGap {
                stream_id: append.stream_id.clone(),
                expected: running.version + 1,
                found: event.sequence,
            }
            .into());
        }
        if event.previous_hash != running.hash {
            return Err(ChainVerificationError::BrokenChain {
                stream_id: append.stream_id.clone(),
                sequence: event.sequence,
                reason: "staged event does not link to the durable head".to_string(),
            }
            .into());
        }
        running = StreamHead {
            version: event.sequence,
            hash: event.hash,
        };
    }
    Ok(running)
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn stream_head(&self, stream_id: &str) -> Result<StreamHead, EventStoreError> {
        self.ensure_available()?;
        let streams = self.streams.read().await;
        Ok(head_of(streams.get(stream_id)))
    }

    async fn read_page(
        &self,
        stream_id: &str,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        self.ensure_available()?;
        let streams = self.streams.read().await;
        let Some(events) = streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        // sequences start at 1 and have no gaps, so the index is sequence - 1
        let start = from_sequence.max(1) - 1;
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(events.len());
        let end = start.saturating_add(limit).min(events.len());
        Ok(events[start..end].to_vec())
    }

    async fn commit_batch(&self, appends: Vec<StagedAppend>) -> Result<(), EventStoreError> {
        self.ensure_available()?;
        let mut streams = self.streams.write().await;

        let mut heads: HashMap<&str, StreamHead> = HashMap::new();
        for append in &appends {
            let head = match heads.get(append.stream_id.as_str()) {
                Some(head) => *head,
                None => head_of(streams.get(&append.stream_id)),
            };
            if head.version != append.expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id: append.stream_id.clone(),
                    expected: append.expected_version,
                    current: head.version,
                });
            }
            let new_head = check_linkage(head, append)?;
            heads.insert(append.stream_id.as_str(), new_head);
        }

        for append in appends {
            debug!(
                stream_id = %append.stream_id,
                version = append.new_version(),
                events = append.events.len(),
                "Committed staged append"
            );
            streams
                .entry(append.stream_id)
                .or_default()
                .extend(append.events);
        }
        Ok(())
    }
}
