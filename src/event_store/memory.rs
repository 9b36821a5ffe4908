//! In-memory Event Store
//!
//! Backend for tests, the load generator and servers started without a
//! database. Streams live behind a single lock, which makes every append
//! atomic with respect to readers and other writers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{AppendOutcome, EventStore, EventStoreError, NewEvent, StoredEvent};

#[derive(Debug, Default)]
struct Streams {
    by_aggregate: HashMap<Uuid, Vec<StoredEvent>>,
    /// Every committed event in commit order
    log: Vec<StoredEvent>,
}

/// In-memory append-only event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<Streams>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Unavailable("event store lock poisoned".to_string())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendOutcome, EventStoreError> {
        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;
        let Streams { by_aggregate, log } = &mut *streams;

        let current = by_aggregate
            .get(&aggregate_id)
            .map(|s| s.len() as i64)
            .unwrap_or(0);

        if current != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        if events.is_empty() {
            return Ok(AppendOutcome {
                new_version: current,
                events: Vec::new(),
            });
        }

        // Enforce aggregate type stability across the stream and the batch
        let stream_type = by_aggregate
            .get(&aggregate_id)
            .and_then(|s| s.first())
            .map(|e| e.aggregate_type.clone())
            .unwrap_or_else(|| events[0].aggregate_type.clone());
        if let Some(bad) = events.iter().find(|e| e.aggregate_type != stream_type) {
            return Err(EventStoreError::InvalidEventData(format!(
                "stream {} holds '{}' events, attempted append of '{}'",
                aggregate_id, stream_type, bad.aggregate_type
            )));
        }

        let recorded_at = Utc::now();
        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            committed.push(StoredEvent {
                id: Uuid::new_v4(),
                position: log.len() as i64 + offset as i64 + 1,
                aggregate_type: event.aggregate_type,
                aggregate_id,
                sequence: expected_version + offset as i64,
                event_type: event.event_type,
                payload: event.payload,
                metadata: event.metadata,
                recorded_at,
            });
        }

        by_aggregate
            .entry(aggregate_id)
            .or_default()
            .extend(committed.iter().cloned());
        log.extend(committed.iter().cloned());

        Ok(AppendOutcome {
            new_version: expected_version + committed.len() as i64,
            events: committed,
        })
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        Ok(streams
            .by_aggregate
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        let start = after_position.max(0) as usize;
        Ok(streams.log.iter().skip(start).take(limit).cloned().collect())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        Ok(streams
            .by_aggregate
            .get(&aggregate_id)
            .map(|s| s.len() as i64)
            .unwrap_or(0))
    }
}
