//! Event Store module
//!
//! Persistence layer for Event Sourcing.
//! Stores and retrieves account events, in memory or in PostgreSQL.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::EventStoreError;
pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;
pub use store::{AppendOutcome, EventStore, NewEvent, StoredEvent};
