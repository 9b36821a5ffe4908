//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts that have happened to an account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Currency;

/// Account lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// No stream exists yet
    #[default]
    New,
    Created,
    Activated,
    Held,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::New => "NEW",
            AccountStatus::Created => "CREATED",
            AccountStatus::Activated => "ACTIVATED",
            AccountStatus::Held => "HELD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(AccountStatus::New),
            "CREATED" => Some(AccountStatus::Created),
            "ACTIVATED" => Some(AccountStatus::Activated),
            "HELD" => Some(AccountStatus::Held),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    /// Account was opened with an initial balance
    AccountCreated {
        account_id: Uuid,
        balance: Decimal,
        currency: Currency,
        status: AccountStatus,
        created_at: DateTime<Utc>,
    },

    /// Account became able to move money
    AccountActivated {
        account_id: Uuid,
        status: AccountStatus,
        activated_at: DateTime<Utc>,
    },

    /// Money was debited from the account (balance decreased)
    AccountDebited {
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        debited_at: DateTime<Utc>,
    },

    /// Money was credited to the account (balance increased)
    AccountCredited {
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        credited_at: DateTime<Utc>,
    },

    /// Account was put on hold
    AccountHeld {
        account_id: Uuid,
        status: AccountStatus,
        held_at: DateTime<Utc>,
    },
}

impl AccountEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated { .. } => "AccountCreated",
            AccountEvent::AccountActivated { .. } => "AccountActivated",
            AccountEvent::AccountDebited { .. } => "AccountDebited",
            AccountEvent::AccountCredited { .. } => "AccountCredited",
            AccountEvent::AccountHeld { .. } => "AccountHeld",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_event_serialization() {
        let event = AccountEvent::AccountDebited {
            account_id: Uuid::new_v4(),
            amount: dec!(200),
            currency: Currency::new("USD").unwrap(),
            debited_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AccountDebited");
        assert_eq!(json["currency"], "USD");

        let deserialized: AccountEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_account_status_wire_format() {
        let json = serde_json::to_string(&AccountStatus::Activated).unwrap();
        assert_eq!(json, r#""ACTIVATED""#);

        for status in [
            AccountStatus::New,
            AccountStatus::Created,
            AccountStatus::Activated,
            AccountStatus::Held,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("FROZEN"), None);
    }
}
