//! Command definitions
//!
//! Commands represent intentions to change the system state. Each command
//! targets exactly one account; a create command mints its id up front so
//! retries keep addressing the same stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_store::StoredEvent;

/// Command to open a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub account_id: Uuid,
    /// Opening balance
    pub balance: Decimal,
    /// ISO 4217 code
    pub currency: String,
}

impl CreateAccountCommand {
    pub fn new(balance: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            balance,
            currency: currency.into(),
        }
    }
}

/// Command to withdraw money from an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitAccountCommand {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

impl DebitAccountCommand {
    pub fn new(account_id: Uuid, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            currency: currency.into(),
        }
    }
}

/// Command to deposit money into an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccountCommand {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

impl CreditAccountCommand {
    pub fn new(account_id: Uuid, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            currency: currency.into(),
        }
    }
}

/// Every command the dispatcher routes
#[derive(Debug, Clone)]
pub enum AccountCommand {
    Create(CreateAccountCommand),
    Debit(DebitAccountCommand),
    Credit(CreditAccountCommand),
}

impl AccountCommand {
    /// The one aggregate this command is addressed to
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            AccountCommand::Create(cmd) => cmd.account_id,
            AccountCommand::Debit(cmd) => cmd.account_id,
            AccountCommand::Credit(cmd) => cmd.account_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountCommand::Create(_) => "CreateAccount",
            AccountCommand::Debit(_) => "DebitAccount",
            AccountCommand::Credit(_) => "CreditAccount",
        }
    }
}

impl From<CreateAccountCommand> for AccountCommand {
    fn from(cmd: CreateAccountCommand) -> Self {
        AccountCommand::Create(cmd)
    }
}

impl From<DebitAccountCommand> for AccountCommand {
    fn from(cmd: DebitAccountCommand) -> Self {
        AccountCommand::Debit(cmd)
    }
}

impl From<CreditAccountCommand> for AccountCommand {
    fn from(cmd: CreditAccountCommand) -> Self {
        AccountCommand::Credit(cmd)
    }
}

/// What a successful command committed
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub aggregate_id: Uuid,
    /// Stream version after the append
    pub version: i64,
    pub events: Vec<StoredEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_command_mints_id() {
        let a = CreateAccountCommand::new(dec!(1000), "USD");
        let b = CreateAccountCommand::new(dec!(1000), "USD");
        assert_ne!(a.account_id, b.account_id);

        let cmd = AccountCommand::from(a.clone());
        assert_eq!(cmd.aggregate_id(), a.account_id);
        assert_eq!(cmd.name(), "CreateAccount");
    }

    #[test]
    fn test_amount_accepts_string_or_number() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"account_id":"{}","amount":"200.50","currency":"USD"}}"#, id);
        let cmd: DebitAccountCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd.amount, dec!(200.50));

        let json = format!(r#"{{"account_id":"{}","amount":50,"currency":"USD"}}"#, id);
        let cmd: CreditAccountCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd.amount, dec!(50));
    }
}
