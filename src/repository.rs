//! Aggregate repository
//!
//! Loads aggregates by replaying their stream and saves decided events.
//! A successful save is the only place committed events are handed to the
//! projection worker, so nothing reaches the read model unless it is
//! durable first.

use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{replay, Aggregate, DomainEvent};
use crate::domain::OperationContext;
use crate::event_store::{AppendOutcome, EventStore, EventStoreError, NewEvent};
use crate::projection::{ProjectionBatch, ProjectionSender};

#[derive(Clone)]
pub struct AggregateRepository {
    event_store: Arc<dyn EventStore>,
    projection: ProjectionSender,
}

impl AggregateRepository {
    pub fn new(event_store: Arc<dyn EventStore>, projection: ProjectionSender) -> Self {
        Self {
            event_store,
            projection,
        }
    }

    /// Rebuild an aggregate from its stream.
    ///
    /// An unknown id yields the zero value at version 0.
    pub async fn load<A: Aggregate>(&self, aggregate_id: Uuid) -> Result<(A, i64), EventStoreError> {
        let stream = self.event_store.load(aggregate_id).await?;

        let mut events = Vec::with_capacity(stream.len());
        for (index, stored) in stream.iter().enumerate() {
            if stored.sequence != index as i64 {
                return Err(EventStoreError::InvalidEventData(format!(
                    "stream {} has sequence {} at position {}",
                    aggregate_id, stored.sequence, index
                )));
            }
            events.push(stored.decode::<A::Event>()?);
        }

        let version = events.len() as i64;
        Ok((replay(events), version))
    }

    /// Append decided events at `expected_version` and publish them.
    pub async fn save<E: DomainEvent>(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[E],
        context: &OperationContext,
    ) -> Result<AppendOutcome, EventStoreError> {
        let batch = events
            .iter()
            .map(|event| NewEvent::new(aggregate_type, event.event_type(), event, context))
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = self
            .event_store
            .append(aggregate_id, expected_version, batch)
            .await?;

        if !outcome.events.is_empty() {
            self.projection.deliver(ProjectionBatch {
                aggregate_id,
                events: outcome.events.clone(),
            });
        }

        Ok(outcome)
    }
}
