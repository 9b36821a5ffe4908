//! Account queries
//!
//! Read-side entry point: lookups served from the read model plus live
//! subscriptions to it. Nothing here touches the event store.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::projection::{AccountOperation, BankAccount, ReadModelStore};

use super::{Predicate, Subscription, SubscriptionRegistry};

/// Initial state plus the live update stream of one account
#[derive(Debug)]
pub struct AccountSubscription {
    pub initial: BankAccount,
    pub updates: Subscription,
}

#[derive(Clone)]
pub struct AccountQueryService {
    read_models: Arc<dyn ReadModelStore>,
    registry: Arc<SubscriptionRegistry>,
}

impl AccountQueryService {
    pub fn new(read_models: Arc<dyn ReadModelStore>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            read_models,
            registry,
        }
    }

    pub async fn get_account(&self, id: Uuid) -> Result<BankAccount, AppError> {
        self.read_models
            .get_account(id)
            .await?
            .ok_or(AppError::AccountNotFound(id))
    }

    /// Every account, ordered by id
    pub async fn get_all_accounts(&self) -> Result<Vec<BankAccount>, AppError> {
        Ok(self.read_models.list_accounts().await?)
    }

    /// History of an account, oldest first
    pub async fn get_account_operations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOperation>, AppError> {
        if self.read_models.get_account(account_id).await?.is_none() {
            return Err(AppError::AccountNotFound(account_id));
        }
        Ok(self.read_models.list_operations(account_id).await?)
    }

    /// Current rows matching `predicate` and a stream of later changes to them.
    ///
    /// The subscription is registered before the read, so an update that
    /// lands in between shows up in the stream (possibly repeating what the
    /// initial result already holds).
    pub async fn subscribe(
        &self,
        predicate: Predicate,
    ) -> Result<(Vec<BankAccount>, Subscription), AppError> {
        let subscription = self.registry.subscribe(predicate.clone());

        let initial = self
            .read_models
            .list_accounts()
            .await?
            .into_iter()
            .filter(|account| predicate(account))
            .collect();

        Ok((initial, subscription))
    }

    /// Watch one account
    pub async fn subscribe_account(&self, id: Uuid) -> Result<AccountSubscription, AppError> {
        let updates = self
            .registry
            .subscribe(Arc::new(move |account: &BankAccount| account.id == id));

        // Dropping `updates` on the error path cancels the registration
        let initial = self.get_account(id).await?;

        Ok(AccountSubscription { initial, updates })
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.active_count()
    }
}
