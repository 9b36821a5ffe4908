//! Command Handlers module
//!
//! CQRS command side: command definitions and the dispatcher that runs
//! them against the account aggregate.

mod commands;
mod dispatcher;
mod locks;


pub use commands::*;
pub use dispatcher::{CommandDispatcher, CommandFuture, DispatcherConfig};
pub use locks::{AggregateGuard, AggregateLocks};
