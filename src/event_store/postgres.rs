//! PostgreSQL Event Store
//!
//! Durable backend. Optimistic locking is enforced twice: the expected
//! version is compared inside the transaction, and the
//! `UNIQUE (aggregate_id, sequence)` constraint turns a lost race between
//! two transactions into a concurrency conflict as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AppendOutcome, EventStore, EventStoreError, NewEvent, StoredEvent};

type EventRow = (
    Uuid,
    i64,
    String,
    Uuid,
    i64,
    String,
    serde_json::Value,
    serde_json::Value,
    DateTime<Utc>,
);

fn from_row(row: EventRow) -> StoredEvent {
    let (id, position, aggregate_type, aggregate_id, sequence, event_type, payload, metadata, recorded_at) =
        row;
    StoredEvent {
        id,
        position,
        aggregate_type,
        aggregate_id,
        sequence,
        event_type,
        payload,
        metadata,
        recorded_at,
    }
}

/// Event Store backed by the `events` table
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a new PgEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get current version of an aggregate inside a transaction
    async fn version_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let version: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(version)
    }

    async fn stream_type_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<Option<String>, EventStoreError> {
        let aggregate_type: Option<String> = sqlx::query_scalar(
            r#"
            SELECT aggregate_type FROM events WHERE aggregate_id = $1 AND sequence = 0
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(aggregate_type)
    }

    /// A unique violation on insert means another writer committed the same
    /// sequence first; report the version it left behind.
    async fn insert_error(
        &self,
        err: sqlx::Error,
        aggregate_id: Uuid,
        expected: i64,
    ) -> EventStoreError {
        if !is_unique_violation(&err) {
            return EventStoreError::Database(err);
        }
        match self.current_version(aggregate_id).await {
            Ok(actual) => EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            Err(e) => e,
        }
    }

    /// Insert a batch; a unique violation means another writer got there first
    async fn try_append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendOutcome, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        let current = Self::version_in_tx(&mut tx, aggregate_id).await?;
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

        let stream_type = Self::stream_type_in_tx(&mut tx, aggregate_id)
            .await?
            .unwrap_or_else(|| events[0].aggregate_type.clone());
        if let Some(bad) = events.iter().find(|e| e.aggregate_type != stream_type) {
            return Err(EventStoreError::InvalidEventData(format!(
                "stream {} holds '{}' events, attempted append of '{}'",
                aggregate_id, stream_type, bad.aggregate_type
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let sequence = expected_version + offset as i64;

            let inserted: Result<EventRow, sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO events (
                    id, aggregate_type, aggregate_id, sequence,
                    event_type, payload, metadata
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, position, aggregate_type, aggregate_id, sequence,
                          event_type, payload, metadata, recorded_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&event.aggregate_type)
            .bind(aggregate_id)
            .bind(sequence)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.metadata)
            .fetch_one(&mut *tx)
            .await;

            let row = match inserted {
                Ok(row) => row,
                Err(e) => {
                    // Roll back before reading the winner's version
                    drop(tx);
                    return Err(self.insert_error(e, aggregate_id, expected_version).await);
                }
            };
            committed.push(from_row(row));
        }

        if let Err(e) = tx.commit().await {
            return Err(self.insert_error(e, aggregate_id, expected_version).await);
        }

        Ok(AppendOutcome {
            new_version: expected_version + committed.len() as i64,
            events: committed,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<AppendOutcome, EventStoreError> {
        let count = events.len();
        let outcome = self.try_append(aggregate_id, expected_version, events).await?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            events = count,
            new_version = outcome.new_version,
            "Events appended"
        );

        Ok(outcome)
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.load_from(aggregate_id, 0).await
    }

    async fn load_from(
        &self,
        aggregate_id: Uuid,
        from_sequence: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, position, aggregate_type, aggregate_id, sequence,
                   event_type, payload, metadata, recorded_at
            FROM events
            WHERE aggregate_id = $1 AND sequence >= $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_sequence)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn load_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, position, aggregate_type, aggregate_id, sequence,
                   event_type, payload, metadata, recorded_at
            FROM events
            WHERE position > $1
            ORDER BY position ASC
            LIMIT $2
            "#,
        )
        .bind(after_position)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let version: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(version)
    }
}
