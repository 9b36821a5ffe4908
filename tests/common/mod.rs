//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use account_ledger::aggregate::OverdraftPolicy;
use account_ledger::handlers::DispatcherConfig;
use account_ledger::projection::{
    AccountOperation, BankAccount, InMemoryReadModelStore, ProjectionError, ProjectionRetry,
    ProjectionUpdate, ReadModelStore,
};
use account_ledger::{Ledger, LedgerConfig};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

pub const PROJECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(policy: OverdraftPolicy) -> LedgerConfig {
    LedgerConfig {
        dispatcher: DispatcherConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            overdraft_policy: policy,
        },
        projection: ProjectionRetry {
            max_retries: 3,
            delay: Duration::from_millis(5),
            redrive_interval: Duration::from_millis(20),
        },
    }
}

/// Fresh in-memory ledger
pub fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::in_memory(test_config(OverdraftPolicy::Reject)))
}

/// Wait until the read model reflects every event of the account
pub async fn settle(ledger: &Ledger, account_id: Uuid) {
    let version = ledger.account_events(account_id).await.unwrap().len() as i64;
    ledger
        .wait_for_projection(account_id, version, PROJECTION_TIMEOUT)
        .await
        .unwrap();
}

/// Connect to DATABASE_URL.
///
/// Returns `None` when no database is configured so Postgres tests can be
/// skipped. Tests run in parallel against the same tables, so each one
/// works on fresh account ids instead of truncating.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    Some(pool)
}

/// In-memory read model whose writes fail during a simulated outage
#[derive(Default)]
pub struct FlakyReadModelStore {
    inner: InMemoryReadModelStore,
    failing_writes: AtomicU32,
}

impl FlakyReadModelStore {
    /// Fail the next `count` calls to `apply_update`
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn remaining_failures(&self) -> u32 {
        self.failing_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadModelStore for FlakyReadModelStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<BankAccount>, ProjectionError> {
        self.inner.get_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<BankAccount>, ProjectionError> {
        self.inner.list_accounts().await
    }

    async fn list_operations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOperation>, ProjectionError> {
        self.inner.list_operations(account_id).await
    }

    async fn checkpoint(&self, account_id: Uuid) -> Result<Option<i64>, ProjectionError> {
        self.inner.checkpoint(account_id).await
    }

    async fn apply_update(&self, update: ProjectionUpdate) -> Result<bool, ProjectionError> {
        let outage = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if outage.is_ok() {
            return Err(ProjectionError::Unavailable("storage offline".to_string()));
        }
        self.inner.apply_update(update).await
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        self.inner.reset().await
    }
}
