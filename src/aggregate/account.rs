//! Account Aggregate
//!
//! Account is the only aggregate of the ledger. Decision methods validate a
//! command against the current state and return the events to persist; the
//! state itself only changes through `apply`.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{AccountEvent, AccountStatus, Amount, Balance, Currency, DomainError};

use super::{decide_with_reactions, Aggregate, DomainEvent};

/// What to do with a debit larger than the available balance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdraftPolicy {
    #[default]
    Reject,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown overdraft policy '{0}' (expected 'reject' or 'allow')")]
pub struct UnknownOverdraftPolicy(pub String);

impl FromStr for OverdraftPolicy {
    type Err = UnknownOverdraftPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "allow" => Ok(Self::Allow),
            other => Err(UnknownOverdraftPolicy(other.to_string())),
        }
    }
}

/// Account Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    id: Uuid,
    balance: Balance,
    currency: Option<Currency>,
    status: AccountStatus,

    /// Number of events applied, which is also the next sequence number
    version: i64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            balance: Balance::zero(),
            currency: None,
            status: AccountStatus::New,
            version: 0,
        }
    }
}

impl Account {
    /// Open the account.
    ///
    /// Only valid while no stream exists. The returned batch already holds
    /// the activation that creation always triggers.
    pub fn create(
        &self,
        account_id: Uuid,
        opening_balance: Balance,
        currency: Currency,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        if self.status != AccountStatus::New {
            return Err(DomainError::invalid_transition("create", self.status));
        }

        let created = AccountEvent::AccountCreated {
            account_id,
            balance: opening_balance.value(),
            currency,
            status: AccountStatus::Created,
            created_at: Utc::now(),
        };

        Ok(decide_with_reactions(self, vec![created]))
    }

    /// Debit (withdraw) money from the account
    pub fn debit(
        &self,
        amount: &Amount,
        currency: &Currency,
        policy: OverdraftPolicy,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_can_move_money("debit", currency)?;

        if policy == OverdraftPolicy::Reject && !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_balance(
                amount.value(),
                self.balance.value(),
            ));
        }

        let debited = AccountEvent::AccountDebited {
            account_id: self.id,
            amount: amount.value(),
            currency: currency.clone(),
            debited_at: Utc::now(),
        };

        Ok(decide_with_reactions(self, vec![debited]))
    }

    /// Credit (deposit) money to the account
    pub fn credit(
        &self,
        amount: &Amount,
        currency: &Currency,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_can_move_money("credit", currency)?;

        let credited = AccountEvent::AccountCredited {
            account_id: self.id,
            amount: amount.value(),
            currency: currency.clone(),
            credited_at: Utc::now(),
        };

        Ok(decide_with_reactions(self, vec![credited]))
    }

    /// Put an active account on hold
    pub fn hold(&self) -> Result<Vec<AccountEvent>, DomainError> {
        if self.status != AccountStatus::Activated {
            return Err(DomainError::invalid_transition("hold", self.status));
        }

        let held = AccountEvent::AccountHeld {
            account_id: self.id,
            status: AccountStatus::Held,
            held_at: Utc::now(),
        };

        Ok(decide_with_reactions(self, vec![held]))
    }

    fn ensure_can_move_money(
        &self,
        command: &'static str,
        currency: &Currency,
    ) -> Result<(), DomainError> {
        if self.status != AccountStatus::Activated {
            return Err(DomainError::invalid_transition(command, self.status));
        }

        match &self.currency {
            Some(expected) if expected == currency => Ok(()),
            Some(expected) => Err(DomainError::CurrencyMismatch {
                expected: expected.to_string(),
                actual: currency.to_string(),
            }),
            None => Err(DomainError::invalid_transition(command, self.status)),
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn currency(&self) -> Option<&Currency> {
        self.currency.as_ref()
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        AccountEvent::event_type(self)
    }
}

impl Aggregate for Account {
    type Event = AccountEvent;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            AccountEvent::AccountCreated {
                account_id,
                balance,
                currency,
                status,
                ..
            } => {
                self.id = account_id;
                self.balance = Balance::from_decimal(balance);
                self.currency = Some(currency);
                self.status = status;
            }

            AccountEvent::AccountActivated { status, .. } => {
                self.status = status;
            }

            AccountEvent::AccountDebited { amount, .. } => {
                self.balance = self.balance.debit(amount);
            }

            AccountEvent::AccountCredited { amount, .. } => {
                self.balance = self.balance.credit(amount);
            }

            AccountEvent::AccountHeld { status, .. } => {
                self.status = status;
            }
        }

        self.version += 1;
        self
    }

    fn react(&self, event: &Self::Event) -> Vec<Self::Event> {
        match event {
            // Creation always activates right away
            AccountEvent::AccountCreated {
                account_id,
                created_at,
                ..
            } => vec![AccountEvent::AccountActivated {
                account_id: *account_id,
                status: AccountStatus::Activated,
                activated_at: *created_at,
            }],
            _ => Vec::new(),
        }
    }
}

/// Sum of all signed movements in a stream
pub fn net_movement(events: &[AccountEvent]) -> Decimal {
    events.iter().fold(Decimal::ZERO, |acc, event| match event {
        AccountEvent::AccountDebited { amount, .. } => acc - amount,
        AccountEvent::AccountCredited { amount, .. } => acc + amount,
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::replay;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn opened(balance: Decimal) -> (Account, Vec<AccountEvent>) {
        let events = Account::default()
            .create(Uuid::new_v4(), Balance::opening(balance).unwrap(), usd())
            .unwrap();
        let account = replay::<Account, _>(events.clone());
        (account, events)
    }

    #[test]
    fn test_create_chains_activation() {
        let account_id = Uuid::new_v4();
        let events = Account::default()
            .create(account_id, Balance::opening(dec!(1000)).unwrap(), usd())
            .unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            AccountEvent::AccountCreated { status: AccountStatus::Created, .. }
        ));
        assert!(matches!(
            events[1],
            AccountEvent::AccountActivated { status: AccountStatus::Activated, .. }
        ));

        let account = replay::<Account, _>(events);
        assert_eq!(account.id(), account_id);
        assert_eq!(account.status(), AccountStatus::Activated);
        assert_eq!(account.balance().value(), dec!(1000));
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn test_create_twice_rejected() {
        let (account, _) = opened(dec!(10));
        let result = account.create(account.id(), Balance::zero(), usd());
        assert!(matches!(
            result,
            Err(DomainError::InvalidStateTransition { command: "create", .. })
        ));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let (account, mut events) = opened(dec!(1000));
        events.extend(account.debit(&amount(dec!(200)), &usd(), OverdraftPolicy::Reject).unwrap());
        let account = replay::<Account, _>(events.clone());
        events.extend(account.credit(&amount(dec!(50)), &usd()).unwrap());

        let first = replay::<Account, _>(events.clone());
        let second = replay::<Account, _>(events);
        assert_eq!(first, second);
        assert_eq!(first.balance().value(), dec!(850));
        assert_eq!(first.version(), 4);
    }

    #[test]
    fn test_debit_and_credit_on_new_account_rejected() {
        let account = Account::default();

        let debit = account.debit(&amount(dec!(1)), &usd(), OverdraftPolicy::Allow);
        assert!(matches!(
            debit,
            Err(DomainError::InvalidStateTransition { status: AccountStatus::New, .. })
        ));

        let credit = account.credit(&amount(dec!(1)), &usd());
        assert!(matches!(
            credit,
            Err(DomainError::InvalidStateTransition { status: AccountStatus::New, .. })
        ));
    }

    #[test]
    fn test_currency_mismatch_rejected() {
        let (account, _) = opened(dec!(100));
        let eur = Currency::new("EUR").unwrap();

        let result = account.credit(&amount(dec!(5)), &eur);
        assert!(matches!(result, Err(DomainError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_overdraft_policy() {
        let (account, _) = opened(dec!(100));

        let rejected = account.debit(&amount(dec!(150)), &usd(), OverdraftPolicy::Reject);
        assert!(matches!(rejected, Err(DomainError::InsufficientBalance { .. })));

        let allowed = account
            .debit(&amount(dec!(150)), &usd(), OverdraftPolicy::Allow)
            .unwrap();
        let account = allowed.into_iter().fold(account, |acc, e| acc.apply(e));
        assert_eq!(account.balance().value(), dec!(-50));
    }

    #[test]
    fn test_held_account_cannot_move_money() {
        let (account, _) = opened(dec!(100));
        let held = account.hold().unwrap();
        let account = held.into_iter().fold(account, |acc, e| acc.apply(e));

        assert_eq!(account.status(), AccountStatus::Held);
        assert!(account.credit(&amount(dec!(1)), &usd()).is_err());
        assert!(account.hold().is_err());
    }

    #[test]
    fn test_net_movement() {
        let (account, _) = opened(dec!(0));
        let mut events = account.credit(&amount(dec!(30)), &usd()).unwrap();
        events.extend(account.credit(&amount(dec!(12.5)), &usd()).unwrap());
        events.push(AccountEvent::AccountDebited {
            account_id: account.id(),
            amount: dec!(2.5),
            currency: usd(),
            debited_at: Utc::now(),
        });
        assert_eq!(net_movement(&events), dec!(40));
    }

    #[test]
    fn test_overdraft_policy_parse() {
        assert_eq!("ALLOW".parse::<OverdraftPolicy>(), Ok(OverdraftPolicy::Allow));
        assert_eq!("reject".parse::<OverdraftPolicy>(), Ok(OverdraftPolicy::Reject));
        assert_eq!(
            "maybe".parse::<OverdraftPolicy>(),
            Err(UnknownOverdraftPolicy("maybe".to_string()))
        );
    }
}
