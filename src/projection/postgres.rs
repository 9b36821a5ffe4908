//! PostgreSQL read model
//!
//! `bank_accounts` keeps the checkpoint (`last_sequence`) on the row it
//! guards, so the conditional upsert and the operation insert share one
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::AccountStatus;

use super::{
    AccountOperation, BankAccount, OperationType, ProjectionError, ProjectionUpdate,
    ReadModelStore,
};

type AccountRow = (Uuid, Decimal, String, String);
type OperationRow = (i64, DateTime<Utc>, Decimal, String, Uuid);

fn account_from_row((id, balance, currency, status): AccountRow) -> Result<BankAccount, ProjectionError> {
    let status = AccountStatus::parse(&status)
        .ok_or_else(|| ProjectionError::InvalidRow(format!("unknown account status '{}'", status)))?;
    Ok(BankAccount {
        id,
        balance,
        currency,
        status,
    })
}

fn operation_from_row(
    (id, operation_date, amount, operation_type, account_id): OperationRow,
) -> Result<AccountOperation, ProjectionError> {
    let operation_type = OperationType::parse(&operation_type).ok_or_else(|| {
        ProjectionError::InvalidRow(format!("unknown operation type '{}'", operation_type))
    })?;
    Ok(AccountOperation {
        id,
        operation_date,
        amount,
        operation_type,
        account_id,
    })
}

/// Read model backed by `bank_accounts` / `account_operations`
#[derive(Debug, Clone)]
pub struct PgReadModelStore {
    pool: PgPool,
}

impl PgReadModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadModelStore for PgReadModelStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<BankAccount>, ProjectionError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, balance, currency, status FROM bank_accounts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<BankAccount>, ProjectionError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, balance, currency, status FROM bank_accounts ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(account_from_row).collect()
    }

    async fn list_operations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOperation>, ProjectionError> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, operation_date, amount, type, account_id
            FROM account_operations
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(operation_from_row).collect()
    }

    async fn checkpoint(&self, account_id: Uuid) -> Result<Option<i64>, ProjectionError> {
        let checkpoint: Option<i64> =
            sqlx::query_scalar("SELECT last_sequence FROM bank_accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(checkpoint)
    }

    async fn apply_update(&self, update: ProjectionUpdate) -> Result<bool, ProjectionError> {
        let mut tx = self.pool.begin().await?;
        let account = &update.account;

        let rows_affected = sqlx::query(
            r#"
            INSERT INTO bank_accounts (id, balance, currency, status, last_sequence)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                balance = EXCLUDED.balance,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                last_sequence = EXCLUDED.last_sequence,
                updated_at = NOW()
            WHERE bank_accounts.last_sequence < EXCLUDED.last_sequence
            "#,
        )
        .bind(account.id)
        .bind(account.balance)
        .bind(&account.currency)
        .bind(account.status.as_str())
        .bind(update.sequence)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Checkpoint already at or past this event
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(op) = &update.operation {
            sqlx::query(
                r#"
                INSERT INTO account_operations (operation_date, amount, type, account_id, sequence)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(op.operation_date)
            .bind(op.amount)
            .bind(op.operation_type.as_str())
            .bind(account.id)
            .bind(update.sequence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM account_operations")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM bank_accounts")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Read model tables cleared");
        Ok(())
    }
}
