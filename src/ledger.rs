//! Ledger
//!
//! Wires the event store, command dispatcher, projection worker and query
//! service together and exposes the operations callers use.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::event_store::{EventStore, InMemoryEventStore, PgEventStore, StoredEvent};
use crate::handlers::{
    AccountCommand, CommandDispatcher, CommandFuture, CreateAccountCommand, CreditAccountCommand,
    DebitAccountCommand, DispatcherConfig,
};
use crate::projection::{
    AccountOperation, BankAccount, InMemoryReadModelStore, PgReadModelStore, ProjectionFailure,
    ProjectionRetry, ProjectionService, ProjectionWorker, ReadModelStore,
};
use crate::query::{AccountQueryService, AccountSubscription, Predicate, Subscription, SubscriptionRegistry};
use crate::repository::AggregateRepository;

/// Tunables for the ledger core
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerConfig {
    pub dispatcher: DispatcherConfig,
    pub projection: ProjectionRetry,
}

pub struct Ledger {
    dispatcher: CommandDispatcher,
    queries: AccountQueryService,
    projection: Arc<ProjectionService>,
    worker: ProjectionWorker,
    event_store: Arc<dyn EventStore>,
}

impl Ledger {
    /// Assemble a ledger over the given stores. Spawns the projection
    /// worker, so it must run inside a tokio runtime.
    pub fn new(
        event_store: Arc<dyn EventStore>,
        read_models: Arc<dyn ReadModelStore>,
        config: LedgerConfig,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let projection = Arc::new(ProjectionService::new(
            read_models.clone(),
            event_store.clone(),
            registry.clone(),
        ));
        let (sender, worker) = ProjectionWorker::spawn(projection.clone(), config.projection);

        let repository = AggregateRepository::new(event_store.clone(), sender);
        let dispatcher = CommandDispatcher::new(repository, config.dispatcher);
        let queries = AccountQueryService::new(read_models, registry);

        Self {
            dispatcher,
            queries,
            projection,
            worker,
            event_store,
        }
    }

    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryReadModelStore::new()),
            config,
        )
    }

    pub fn postgres(pool: PgPool, config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(PgEventStore::new(pool.clone())),
            Arc::new(PgReadModelStore::new(pool)),
            config,
        )
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run any command with an explicit context
    pub fn dispatch(&self, command: AccountCommand, context: OperationContext) -> CommandFuture {
        self.dispatcher.dispatch(command, context)
    }

    /// Open an account; resolves to its new id once the events are durable
    pub async fn create_account(&self, balance: Decimal, currency: &str) -> Result<Uuid, AppError> {
        let command = CreateAccountCommand::new(balance, currency);
        let result = self.dispatch(command.into(), OperationContext::new()).await?;
        Ok(result.aggregate_id)
    }

    pub async fn debit_account(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<Uuid, AppError> {
        let command = DebitAccountCommand::new(account_id, amount, currency);
        let result = self.dispatch(command.into(), OperationContext::new()).await?;
        Ok(result.aggregate_id)
    }

    pub async fn credit_account(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<Uuid, AppError> {
        let command = CreditAccountCommand::new(account_id, amount, currency);
        let result = self.dispatch(command.into(), OperationContext::new()).await?;
        Ok(result.aggregate_id)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn queries(&self) -> &AccountQueryService {
        &self.queries
    }

    pub async fn get_account(&self, id: Uuid) -> Result<BankAccount, AppError> {
        self.queries.get_account(id).await
    }

    pub async fn get_all_accounts(&self) -> Result<Vec<BankAccount>, AppError> {
        self.queries.get_all_accounts().await
    }

    pub async fn get_account_operations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOperation>, AppError> {
        self.queries.get_account_operations(account_id).await
    }

    pub async fn subscribe(
        &self,
        predicate: Predicate,
    ) -> Result<(Vec<BankAccount>, Subscription), AppError> {
        self.queries.subscribe(predicate).await
    }

    pub async fn subscribe_account(&self, id: Uuid) -> Result<AccountSubscription, AppError> {
        self.queries.subscribe_account(id).await
    }

    /// Raw stream of an account, straight from the event store
    pub async fn account_events(&self, id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        Ok(self.event_store.load(id).await?)
    }

    // =========================================================================
    // Projection control
    // =========================================================================

    /// Block until the read model has caught up with `version` events of
    /// an account
    pub async fn wait_for_projection(
        &self,
        account_id: Uuid,
        version: i64,
        timeout: Duration,
    ) -> Result<(), AppError> {
        Ok(self.projection.wait_for(account_id, version, timeout).await?)
    }

    /// Discard the read model and replay every stored event into it
    pub async fn rebuild_projections(&self) -> Result<u64, AppError> {
        Ok(self.projection.rebuild().await?)
    }

    /// Batches the projection worker gave up on
    pub fn projection_failures(&self) -> broadcast::Receiver<ProjectionFailure> {
        self.worker.failures()
    }
}
