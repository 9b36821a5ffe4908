//! Event Store contract
//!
//! Append-only, per-aggregate event streams with optimistic concurrency.
//! Sequence numbers start at 0 for the first event of a stream, so the
//! version of a stream (its event count) is also the next sequence number
//! to be written.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::domain::OperationContext;

use super::EventStoreError;

/// Stored event as persisted in a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: Uuid,
    /// Store-wide commit position, starting at 1
    pub position: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Position inside the aggregate stream, starting at 0
    pub sequence: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Deserialize the payload into a typed event
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, EventStoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Event waiting to be appended (no sequence assigned yet)
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl NewEvent {
    /// Serialize a typed event together with its operation context
    pub fn new<E: Serialize>(
        aggregate_type: &str,
        event_type: &str,
        event: &E,
        context: &OperationContext,
    ) -> Result<Self, EventStoreError> {
        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            event_type: event_type.to_string(),
            payload: serde_json::to_value(event)?,
            metadata: serde_json::to_value(context)?,
        })
    }
}

/// Result of a successful append
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Stream version after the append
    pub new_version: i64,
    /// The committed events, in sequence order
    pub events: Vec<StoredEvent>,
}

/// Durable, append-only event log.
///
/// Implementations must:
/// - write a batch atomically with consecutive sequences starting at
///   `expected_version`, or write nothing
/// - fail with `ConcurrencyConflict` when the stream version differs from
///   `expected_version`
/// - return an empty stream (not an error) for unknown aggregates
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendOutcome, EventStoreError>;

    /// Load the full stream for an aggregate, ordered by sequence
    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the part of a stream at or after `from_sequence`
    async fn load_from(
        &self,
        aggregate_id: Uuid,
        from_sequence: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut events = self.load(aggregate_id).await?;
        events.retain(|e| e.sequence >= from_sequence);
        Ok(events)
    }

    /// Page through every stream in commit order
    async fn load_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Current version (event count) of a stream
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        Ok(self.load(aggregate_id).await?.len() as i64)
    }
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendOutcome, EventStoreError> {
        (**self).append(aggregate_id, expected_version, events).await
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load(aggregate_id).await
    }

    async fn load_from(
        &self,
        aggregate_id: Uuid,
        from_sequence: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_from(aggregate_id, from_sequence).await
    }

    async fn load_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all(after_position, limit).await
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        (**self).current_version(aggregate_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountEvent, AccountStatus};

    #[test]
    fn test_new_event_carries_context() {
        let account_id = Uuid::new_v4();
        let event = AccountEvent::AccountActivated {
            account_id,
            status: AccountStatus::Activated,
            activated_at: Utc::now(),
        };
        let correlation_id = Uuid::new_v4();
        let context = OperationContext::new().with_correlation_id(correlation_id);

        let new_event = NewEvent::new("Account", event.event_type(), &event, &context).unwrap();

        assert_eq!(new_event.aggregate_type, "Account");
        assert_eq!(new_event.event_type, "AccountActivated");
        assert_eq!(new_event.payload["type"], "AccountActivated");
        assert_eq!(
            new_event.metadata["correlation_id"],
            serde_json::json!(correlation_id)
        );
    }

    #[test]
    fn test_stored_event_decode() {
        let account_id = Uuid::new_v4();
        let event = AccountEvent::AccountHeld {
            account_id,
            status: AccountStatus::Held,
            held_at: Utc::now(),
        };
        let stored = StoredEvent {
            id: Uuid::new_v4(),
            position: 1,
            aggregate_type: "Account".to_string(),
            aggregate_id: account_id,
            sequence: 0,
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(&event).unwrap(),
            metadata: serde_json::json!({}),
            recorded_at: Utc::now(),
        };

        let decoded: AccountEvent = stored.decode().unwrap();
        assert_eq!(decoded, event);
    }
}
