//! Read-model store
//!
//! Storage interface behind the projection, plus the in-memory backend.
//! `apply_update` is the single write path and is guarded by the per-account
//! checkpoint: an update whose sequence is not newer than the stored
//! checkpoint is ignored, which makes redelivery harmless.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AccountOperation, BankAccount, ProjectionError, ProjectionUpdate};

#[async_trait]
pub trait ReadModelStore: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Option<BankAccount>, ProjectionError>;

    async fn list_accounts(&self) -> Result<Vec<BankAccount>, ProjectionError>;

    async fn list_operations(&self, account_id: Uuid)
        -> Result<Vec<AccountOperation>, ProjectionError>;

    /// Last event sequence folded for this account, if any
    async fn checkpoint(&self, account_id: Uuid) -> Result<Option<i64>, ProjectionError>;

    /// Upsert the account row, insert the optional operation and advance the
    /// checkpoint, all or nothing. Returns `false` when the update was
    /// already applied.
    async fn apply_update(&self, update: ProjectionUpdate) -> Result<bool, ProjectionError>;

    /// Drop every row (used before a full rebuild)
    async fn reset(&self) -> Result<(), ProjectionError>;
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, (BankAccount, i64)>,
    operations: Vec<AccountOperation>,
    next_operation_id: i64,
}

/// In-memory read model
#[derive(Debug, Default)]
pub struct InMemoryReadModelStore {
    tables: RwLock<Tables>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> ProjectionError {
        ProjectionError::Unavailable("read model lock poisoned".to_string())
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<BankAccount>, ProjectionError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.accounts.get(&id).map(|(account, _)| account.clone()))
    }

    async fn list_accounts(&self) -> Result<Vec<BankAccount>, ProjectionError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let mut accounts: Vec<BankAccount> =
            tables.accounts.values().map(|(a, _)| a.clone()).collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn list_operations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOperation>, ProjectionError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .operations
            .iter()
            .filter(|op| op.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn checkpoint(&self, account_id: Uuid) -> Result<Option<i64>, ProjectionError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.accounts.get(&account_id).map(|(_, seq)| *seq))
    }

    async fn apply_update(&self, update: ProjectionUpdate) -> Result<bool, ProjectionError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        let account_id = update.account.id;
        if let Some((_, checkpoint)) = tables.accounts.get(&account_id) {
            if update.sequence <= *checkpoint {
                return Ok(false);
            }
        }

        if let Some(op) = update.operation {
            tables.next_operation_id += 1;
            let id = tables.next_operation_id;
            tables.operations.push(AccountOperation {
                id,
                operation_date: op.operation_date,
                amount: op.amount,
                operation_type: op.operation_type,
                account_id,
            });
        }
        tables
            .accounts
            .insert(account_id, (update.account, update.sequence));

        Ok(true)
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        *tables = Tables::default();
        Ok(())
    }
}
