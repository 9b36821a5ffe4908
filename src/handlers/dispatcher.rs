//! Command Dispatcher
//!
//! Routes each command to the account it addresses and runs the
//! load → decide → append cycle under that account's lock. A version
//! conflict re-runs the whole cycle, up to the configured attempt count.
//!
//! Every dispatch runs on its own task. Dropping the returned future only
//! abandons the result: a command that reached the append still commits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::aggregate::{Account, Aggregate, OverdraftPolicy};
use crate::domain::{AccountEvent, Amount, Balance, Currency, DomainError, OperationContext};
use crate::error::AppError;
use crate::repository::AggregateRepository;

use super::locks::AggregateLocks;
use super::{AccountCommand, CommandResult};

/// Dispatcher settings
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Attempts per command, the first one included
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub overdraft_policy: OverdraftPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(10),
            overdraft_policy: OverdraftPolicy::Reject,
        }
    }
}

struct Inner {
    repository: AggregateRepository,
    locks: AggregateLocks,
    config: DispatcherConfig,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

impl CommandDispatcher {
    pub fn new(repository: AggregateRepository, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                locks: AggregateLocks::new(),
                config,
            }),
        }
    }

    /// Start executing a command. Must be called inside a tokio runtime.
    pub fn dispatch(&self, command: AccountCommand, mut context: OperationContext) -> CommandFuture {
        let inner = self.inner.clone();
        context.ensure_correlation_id();
        CommandFuture {
            handle: tokio::spawn(async move { inner.execute(command, context).await }),
        }
    }

    /// Ids currently holding or waiting on a lock
    pub fn locked_aggregates(&self) -> usize {
        self.inner.locks.len()
    }
}

impl Inner {
    async fn execute(
        &self,
        command: AccountCommand,
        context: OperationContext,
    ) -> Result<CommandResult, AppError> {
        let aggregate_id = command.aggregate_id();
        let _guard = self.locks.acquire(aggregate_id).await;

        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(&command, &context).await {
                Ok(result) => {
                    tracing::info!(
                        command = command.name(),
                        aggregate_id = %aggregate_id,
                        version = result.version,
                        correlation_id = ?context.correlation_id,
                        "Command committed"
                    );
                    return Ok(result);
                }
                Err(AppError::EventStore(e)) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            command = command.name(),
                            aggregate_id = %aggregate_id,
                            attempts = attempt,
                            "Version conflict, giving up"
                        );
                        return Err(AppError::VersionConflict {
                            aggregate_id,
                            attempts: attempt,
                        });
                    }

                    tracing::warn!(
                        command = command.name(),
                        aggregate_id = %aggregate_id,
                        attempt = attempt,
                        error = %e,
                        "Version conflict, retrying"
                    );
                    tokio::time::sleep(self.config.retry_base_delay * attempt).await;
                }
                Err(e) => {
                    tracing::debug!(
                        command = command.name(),
                        aggregate_id = %aggregate_id,
                        error = %e,
                        "Command rejected"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        command: &AccountCommand,
        context: &OperationContext,
    ) -> Result<CommandResult, AppError> {
        let aggregate_id = command.aggregate_id();
        let (account, version) = self.repository.load::<Account>(aggregate_id).await?;

        let events = decide(&account, command, self.config.overdraft_policy)?;

        let outcome = self
            .repository
            .save(Account::aggregate_type(), aggregate_id, version, &events, context)
            .await?;

        Ok(CommandResult {
            aggregate_id,
            version: outcome.new_version,
            events: outcome.events,
        })
    }
}

/// Explicit routing from command kind to account decision.
fn decide(
    account: &Account,
    command: &AccountCommand,
    policy: OverdraftPolicy,
) -> Result<Vec<AccountEvent>, DomainError> {
    match command {
        AccountCommand::Create(cmd) => {
            let balance = Balance::opening(cmd.balance)?;
            let currency = Currency::new(&cmd.currency)?;
            account.create(cmd.account_id, balance, currency)
        }
        AccountCommand::Debit(cmd) => {
            let amount = Amount::new(cmd.amount)?;
            let currency = Currency::new(&cmd.currency)?;
            account.debit(&amount, &currency, policy)
        }
        AccountCommand::Credit(cmd) => {
            let amount = Amount::new(cmd.amount)?;
            let currency = Currency::new(&cmd.currency)?;
            account.credit(&amount, &currency)
        }
    }
}

/// Result of a dispatched command
pub struct CommandFuture {
    handle: JoinHandle<Result<CommandResult, AppError>>,
}

impl Future for CommandFuture {
    type Output = Result<CommandResult, AppError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(AppError::Internal(format!(
                "command task failed: {}",
                e
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event_store::{
        AppendOutcome, EventStore, EventStoreError, InMemoryEventStore, NewEvent, StoredEvent,
    };
    use crate::handlers::{CreateAccountCommand, CreditAccountCommand, DebitAccountCommand};
    use crate::projection::{
        InMemoryReadModelStore, ProjectionRetry, ProjectionService, ProjectionWorker,
    };
    use crate::query::SubscriptionRegistry;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Store that reports a conflict for the first `conflicts` appends
    struct ConflictingStore {
        inner: InMemoryEventStore,
        conflicts: AtomicU32,
        appends: AtomicU32,
    }

    impl ConflictingStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                conflicts: AtomicU32::new(conflicts),
                appends: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EventStore for ConflictingStore {
        async fn append(
            &self,
            aggregate_id: Uuid,
            expected_version: i64,
            events: Vec<NewEvent>,
        ) -> Result<AppendOutcome, EventStoreError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.append(aggregate_id, expected_version, events).await
        }

        async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load(aggregate_id).await
        }

        async fn load_all(
            &self,
            after_position: i64,
            limit: usize,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all(after_position, limit).await
        }
    }

    fn dispatcher_over(store: Arc<dyn EventStore>, config: DispatcherConfig) -> CommandDispatcher {
        let service = Arc::new(ProjectionService::new(
            Arc::new(InMemoryReadModelStore::new()),
            store.clone(),
            Arc::new(SubscriptionRegistry::new()),
        ));
        let (sender, _worker) = ProjectionWorker::spawn(service, ProjectionRetry::default());
        CommandDispatcher::new(AggregateRepository::new(store, sender), config)
    }

    fn fast_config(max_retries: u32) -> DispatcherConfig {
        DispatcherConfig {
            max_retries,
            retry_base_delay: Duration::from_millis(1),
            ..DispatcherConfig::default()
        }
    }

    #[tokio::test]
    async fn test_create_commits_created_and_activated() {
        let store = Arc::new(InMemoryEventStore::new());
        let dispatcher = dispatcher_over(store.clone(), DispatcherConfig::default());

        let cmd = CreateAccountCommand::new(dec!(1000), "usd");
        let id = cmd.account_id;
        let result = dispatcher
            .dispatch(cmd.into(), OperationContext::default())
            .await
            .unwrap();

        assert_eq!(result.aggregate_id, id);
        assert_eq!(result.version, 2);
        let types: Vec<_> = result.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["AccountCreated", "AccountActivated"]);
        assert_eq!(store.load(id).await.unwrap().len(), 2);
        assert_eq!(dispatcher.locked_aggregates(), 0);
    }

    #[tokio::test]
    async fn test_unknown_account_is_rejected_without_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let dispatcher = dispatcher_over(store.clone(), DispatcherConfig::default());
        let id = Uuid::new_v4();

        let err = dispatcher
            .dispatch(
                DebitAccountCommand::new(id, dec!(10), "USD").into(),
                OperationContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        let err = dispatcher
            .dispatch(
                CreditAccountCommand::new(id, dec!(10), "USD").into(),
                OperationContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        assert!(store.load(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failures_are_not_retried() {
        let store = Arc::new(ConflictingStore::new(0));
        let dispatcher = dispatcher_over(store.clone(), fast_config(3));

        let err = dispatcher
            .dispatch(
                CreateAccountCommand::new(dec!(100), "").into(),
                OperationContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("Missing currency"));
        assert_eq!(store.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_then_succeeds() {
        let store = Arc::new(ConflictingStore::new(2));
        let dispatcher = dispatcher_over(store.clone(), fast_config(3));

        let result = dispatcher
            .dispatch(
                CreateAccountCommand::new(dec!(5), "EUR").into(),
                OperationContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.version, 2);
        assert_eq!(store.appends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_bound() {
        let store = Arc::new(ConflictingStore::new(10));
        let dispatcher = dispatcher_over(store.clone(), fast_config(3));

        let err = dispatcher
            .dispatch(
                CreateAccountCommand::new(dec!(5), "EUR").into(),
                OperationContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(matches!(err, AppError::VersionConflict { attempts: 3, .. }));
        assert_eq!(store.appends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dropped_future_still_commits() {
        let store = Arc::new(InMemoryEventStore::new());
        let dispatcher = dispatcher_over(store.clone(), DispatcherConfig::default());

        let cmd = CreateAccountCommand::new(dec!(1), "USD");
        let id = cmd.account_id;
        drop(dispatcher.dispatch(cmd.into(), OperationContext::default()));

        // A later command on the same id queues behind the first one
        let result = dispatcher
            .dispatch(
                CreditAccountCommand::new(id, dec!(1), "USD").into(),
                OperationContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.version, 3);
    }
}
