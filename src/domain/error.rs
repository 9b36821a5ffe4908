//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::{AccountStatus, AmountError, CurrencyError};

/// Domain-specific errors
///
/// These errors represent business rule violations raised by the decision
/// functions before any event exists. They are never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed command input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Command is not valid for the aggregate's current status
    #[error("Cannot {command} an account in status {status}")]
    InvalidStateTransition {
        command: &'static str,
        status: AccountStatus,
    },

    /// Money movement in a different currency than the account's
    #[error("Currency mismatch: account holds {expected}, command uses {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// Insufficient balance for debit operation
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
}

impl DomainError {
    /// Create an invalid state transition error
    pub fn invalid_transition(command: &'static str, status: AccountStatus) -> Self {
        Self::InvalidStateTransition { command, status }
    }

    /// Create an insufficient balance error
    pub fn insufficient_balance(
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    ) -> Self {
        Self::InsufficientBalance { required, available }
    }

    /// Validation-class errors (bad input rather than bad timing)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::CurrencyMismatch { .. } | Self::InsufficientBalance { .. }
        )
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CurrencyError> for DomainError {
    fn from(err: CurrencyError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_insufficient_balance_error() {
        let err = DomainError::insufficient_balance(Decimal::new(100, 0), Decimal::new(50, 0));

        assert!(err.is_validation());
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = DomainError::invalid_transition("debit", AccountStatus::New);

        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "Cannot debit an account in status NEW");
    }

    #[test]
    fn test_from_currency_error() {
        let err: DomainError = CurrencyError::Missing.into();
        assert_eq!(err, DomainError::Validation("Missing currency".to_string()));
    }
}
