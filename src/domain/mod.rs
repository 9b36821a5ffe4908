//! Domain module
//!
//! Core domain types and business rules.

pub mod amount;
pub mod context;
pub mod currency;
pub mod error;
pub mod events;

pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use currency::{Currency, CurrencyError};
pub use error::DomainError;
pub use events::{AccountEvent, AccountStatus};
