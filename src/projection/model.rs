//! Read-model rows
//!
//! The only shapes queries ever see. Both are derived from events and can be
//! thrown away and rebuilt from the event log at any time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::AccountStatus;

/// Current state of an account as seen by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub status: AccountStatus,
}

/// Kind of money movement recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Debit,
    Credit,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Debit => "DEBIT",
            OperationType::Credit => "CREDIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEBIT" => Some(OperationType::Debit),
            "CREDIT" => Some(OperationType::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of an account's debit/credit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOperation {
    /// Auto-increment id, in insertion order
    pub id: i64,
    pub operation_date: DateTime<Utc>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub account_id: Uuid,
}

/// Operation about to be inserted (id assigned by the store)
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation_date: DateTime<Utc>,
    pub amount: Decimal,
    pub operation_type: OperationType,
}

/// Everything one event changes in the read model, committed atomically
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionUpdate {
    pub account: BankAccount,
    /// Sequence of the event being folded; becomes the account's checkpoint
    pub sequence: i64,
    pub operation: Option<NewOperation>,
}
