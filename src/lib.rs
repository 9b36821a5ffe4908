//! Account Ledger Library
//!
//! Event-sourced account ledger: commands append events to per-account
//! streams, a projection folds them into queryable read models, and
//! subscribers are pushed every change.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod event_store;
pub mod handlers;
pub mod ledger;
pub mod projection;
pub mod query;
pub mod repository;

pub use config::Config;
pub use domain::{AccountEvent, AccountStatus, Amount, AmountError, Balance, Currency};
pub use domain::{DomainError, OperationContext};
pub use error::{AppError, AppResult, ErrorKind};
pub use ledger::{Ledger, LedgerConfig};
