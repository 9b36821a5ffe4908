//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.

pub mod account;

use std::collections::VecDeque;

use serde::{de::DeserializeOwned, Serialize};

pub use account::{Account, OverdraftPolicy, UnknownOverdraftPolicy};

/// Event that can be persisted in a stream
pub trait DomainEvent: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Name stored next to the payload
    fn event_type(&self) -> &'static str;
}

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized + Default + Clone {
    /// The type of events this aggregate handles
    type Event: DomainEvent;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state.
    ///
    /// Must be pure and total: replaying the same stream always yields the
    /// same state, and no event that was accepted once may fail here.
    fn apply(self, event: Self::Event) -> Self;

    /// Follow-up events the aggregate decides on right after folding `event`.
    ///
    /// Reactions join the same batch as the event that caused them.
    fn react(&self, _event: &Self::Event) -> Vec<Self::Event> {
        Vec::new()
    }
}

/// Rebuild an aggregate from the zero value by folding `events` in order.
pub fn replay<A, I>(events: I) -> A
where
    A: Aggregate,
    I: IntoIterator<Item = A::Event>,
{
    events.into_iter().fold(A::default(), |state, event| state.apply(event))
}

/// Expand a decision into the full batch to append.
///
/// Each emitted event is folded into a scratch copy of `state`; whatever the
/// aggregate reacts with is queued behind it, so chained events keep the
/// order in which they were raised.
pub fn decide_with_reactions<A: Aggregate>(state: &A, emitted: Vec<A::Event>) -> Vec<A::Event> {
    let mut scratch = state.clone();
    let mut pending: VecDeque<A::Event> = emitted.into();
    let mut batch = Vec::with_capacity(pending.len());

    while let Some(event) = pending.pop_front() {
        scratch = scratch.apply(event.clone());
        pending.extend(scratch.react(&event));
        batch.push(event);
    }

    batch
}
