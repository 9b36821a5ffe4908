//! Projection Service
//!
//! Folds committed account events into the read model.
//! This is the "P" in CQRS - projections for queries.
//!
//! Events of one account are applied strictly in sequence order. The stored
//! checkpoint decides what is new: anything at or below it is skipped, and
//! a batch that starts past `checkpoint + 1` triggers a catch-up read from
//! the event store so no sequence is ever skipped.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::AccountEvent;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::query::SubscriptionRegistry;

use super::{BankAccount, NewOperation, OperationType, ProjectionUpdate, ReadModelStore};

const REBUILD_PAGE_SIZE: usize = 500;

/// Projection Service for updating read models
pub struct ProjectionService {
    read_models: Arc<dyn ReadModelStore>,
    event_store: Arc<dyn EventStore>,
    registry: Arc<SubscriptionRegistry>,
    progress: watch::Sender<u64>,
}

impl ProjectionService {
    pub fn new(
        read_models: Arc<dyn ReadModelStore>,
        event_store: Arc<dyn EventStore>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            read_models,
            event_store,
            registry,
            progress,
        }
    }

    /// Apply a committed batch for one account.
    ///
    /// Safe to call any number of times with the same or overlapping
    /// batches. Returns how many events actually changed the read model.
    pub async fn apply(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
    ) -> Result<usize, ProjectionError> {
        let next = self
            .read_models
            .checkpoint(aggregate_id)
            .await?
            .map_or(0, |seq| seq + 1);

        let pending: Vec<&StoredEvent> = events.iter().filter(|e| e.sequence >= next).collect();
        let Some(first) = pending.first() else {
            tracing::debug!(aggregate_id = %aggregate_id, "Batch already projected, skipping");
            return Ok(0);
        };

        if first.sequence > next {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                expected_sequence = next,
                received_sequence = first.sequence,
                "Gap in projected stream, catching up from event store"
            );
            let missing = self.event_store.load_from(aggregate_id, next).await?;
            return self.apply_in_order(&missing.iter().collect::<Vec<_>>()).await;
        }

        self.apply_in_order(&pending).await
    }

    /// Fold whatever the event store holds past the checkpoint.
    ///
    /// Used to re-drive an account whose delivered batch could not be
    /// projected.
    pub async fn catch_up(&self, aggregate_id: Uuid) -> Result<usize, ProjectionError> {
        let next = self
            .read_models
            .checkpoint(aggregate_id)
            .await?
            .map_or(0, |seq| seq + 1);
        let missing = self.event_store.load_from(aggregate_id, next).await?;
        self.apply_in_order(&missing.iter().collect::<Vec<_>>()).await
    }

    async fn apply_in_order(&self, events: &[&StoredEvent]) -> Result<usize, ProjectionError> {
        let mut applied = 0;
        for event in events {
            if self.apply_one(event).await? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn apply_one(&self, stored: &StoredEvent) -> Result<bool, ProjectionError> {
        let current = self.read_models.get_account(stored.aggregate_id).await?;
        let update = project(current, stored)?;
        let account = update.account.clone();

        if !self.read_models.apply_update(update).await? {
            return Ok(false);
        }

        tracing::debug!(
            account_id = %account.id,
            sequence = stored.sequence,
            event_type = %stored.event_type,
            balance = %account.balance,
            "Projection updated"
        );

        self.registry.notify(&account);
        self.progress.send_modify(|n| *n += 1);
        Ok(true)
    }

    /// Wipe the read model and fold the whole event log again.
    ///
    /// Returns the number of events replayed.
    pub async fn rebuild(&self) -> Result<u64, ProjectionError> {
        self.read_models.reset().await?;

        let mut after = 0;
        let mut replayed = 0u64;
        loop {
            let page = self.event_store.load_all(after, REBUILD_PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            after = last.position;

            for event in &page {
                self.apply_one(event).await?;
                replayed += 1;
            }
        }

        tracing::info!(events = replayed, "Projections rebuilt from event log");
        Ok(replayed)
    }

    /// Wait until the read model reflects `version` events of an account.
    pub async fn wait_for(
        &self,
        aggregate_id: Uuid,
        version: i64,
        timeout: Duration,
    ) -> Result<(), ProjectionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut progress = self.progress.subscribe();

        loop {
            let projected = self
                .read_models
                .checkpoint(aggregate_id)
                .await?
                .map_or(0, |seq| seq + 1);
            if projected >= version {
                return Ok(());
            }

            match tokio::time::timeout_at(deadline, progress.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => {
                    return Err(ProjectionError::Timeout {
                        aggregate_id,
                        version,
                    })
                }
            }
        }
    }
}

/// Compute the read-model change one event causes.
fn project(
    current: Option<BankAccount>,
    stored: &StoredEvent,
) -> Result<ProjectionUpdate, ProjectionError> {
    let event: AccountEvent = stored.decode()?;
    let missing = || ProjectionError::AccountNotFound(stored.aggregate_id);

    let (account, operation) = match event {
        AccountEvent::AccountCreated {
            account_id,
            balance,
            currency,
            status,
            ..
        } => (
            BankAccount {
                id: account_id,
                balance,
                currency: currency.to_string(),
                status,
            },
            None,
        ),
        AccountEvent::AccountActivated { status, .. } | AccountEvent::AccountHeld { status, .. } => {
            let mut account = current.ok_or_else(missing)?;
            account.status = status;
            (account, None)
        }
        AccountEvent::AccountDebited {
            amount, debited_at, ..
        } => {
            let mut account = current.ok_or_else(missing)?;
            account.balance -= amount;
            (account, Some(operation(OperationType::Debit, amount, debited_at)))
        }
        AccountEvent::AccountCredited {
            amount, credited_at, ..
        } => {
            let mut account = current.ok_or_else(missing)?;
            account.balance += amount;
            (account, Some(operation(OperationType::Credit, amount, credited_at)))
        }
    };

    Ok(ProjectionUpdate {
        account,
        sequence: stored.sequence,
        operation,
    })
}

fn operation(
    operation_type: OperationType,
    amount: Decimal,
    operation_date: chrono::DateTime<chrono::Utc>,
) -> NewOperation {
    NewOperation {
        operation_date,
        amount,
        operation_type,
    }
}

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Invalid read model row: {0}")]
    InvalidRow(String),

    #[error("Read model unavailable: {0}")]
    Unavailable(String),

    #[error("Projection of account {aggregate_id} did not reach version {version} in time")]
    Timeout { aggregate_id: Uuid, version: i64 },
}
