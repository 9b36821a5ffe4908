//! Live read-model subscriptions
//!
//! Every subscriber registers a predicate and gets its own unbounded
//! channel. The projection calls `notify` after each successful fold, so a
//! subscriber sees updates in the order they were projected and only the
//! ones its predicate accepts.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::projection::BankAccount;

pub type SubscriptionId = u64;

/// Filter deciding which read-model updates a subscriber receives
pub type Predicate = Arc<dyn Fn(&BankAccount) -> bool + Send + Sync>;

struct Subscriber {
    predicate: Predicate,
    sender: mpsc::UnboundedSender<BankAccount>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Updates start flowing immediately.
    pub fn subscribe(self: &Arc<Self>, predicate: Predicate) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, updates) = mpsc::unbounded_channel();

        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Subscriber { predicate, sender });

        tracing::debug!(subscription_id = id, "Subscription registered");

        Subscription {
            id,
            updates,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();

        if removed {
            tracing::debug!(subscription_id = id, "Subscription cancelled");
        }
        removed
    }

    /// Push an update to every matching subscriber.
    ///
    /// Subscribers whose receiving side is gone are dropped from the
    /// registry. Returns how many subscribers received the update.
    pub fn notify(&self, update: &BankAccount) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for (id, subscriber) in subscribers.iter() {
                if !(subscriber.predicate)(update) {
                    continue;
                }
                if subscriber.sender.send(update.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    pub fn active_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Receiving end of a subscription.
///
/// Dropping it cancels the subscription.
pub struct Subscription {
    id: SubscriptionId,
    updates: mpsc::UnboundedReceiver<BankAccount>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next update, or `None` once the subscription is closed
    pub async fn next(&mut self) -> Option<BankAccount> {
        self.updates.recv().await
    }

    /// Next update if one is already queued
    pub fn try_next(&mut self) -> Option<BankAccount> {
        self.updates.try_recv().ok()
    }

    /// Stop receiving updates
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Stream for Subscription {
    type Item = BankAccount;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
