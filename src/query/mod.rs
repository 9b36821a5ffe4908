//! Query module
//!
//! The "Q" in CQRS: reads and live subscriptions over the read model.

mod service;
mod subscription;

pub use service::{AccountQueryService, AccountSubscription};
pub use subscription::{Predicate, Subscription, SubscriptionId, SubscriptionRegistry};
