//! Projection module
//!
//! Updates read-model tables (projections) from events.
//! Projections are optimized for queries and derived from events.

mod model;
mod postgres;
mod service;
mod store;
mod worker;

pub use model::{AccountOperation, BankAccount, NewOperation, OperationType, ProjectionUpdate};
pub use postgres::PgReadModelStore;
pub use service::{ProjectionError, ProjectionService};
pub use store::{InMemoryReadModelStore, ReadModelStore};
pub use worker::{
    ProjectionBatch, ProjectionFailure, ProjectionRetry, ProjectionSender, ProjectionWorker,
};
