//! Per-aggregate command locks
//!
//! Commands for the same account run one at a time; commands for different
//! accounts never wait on each other. Entries live only while some command
//! holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct AggregateLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, aggregate_id: Uuid) -> AggregateGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(aggregate_id).or_default().clone()
        };

        let guard = lock.lock_owned().await;
        AggregateGuard {
            locks: self,
            aggregate_id,
            guard: Some(guard),
        }
    }

    /// Number of ids with a holder or waiter
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, aggregate_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&aggregate_id) {
            // Only the table itself still points at it
            if Arc::strong_count(lock) == 1 {
                locks.remove(&aggregate_id);
            }
        }
    }
}

pub struct AggregateGuard<'a> {
    locks: &'a AggregateLocks,
    aggregate_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AggregateGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(self.aggregate_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = AggregateLocks::new();
        let id = Uuid::new_v4();

        {
            let _guard = locks.acquire(id).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_id_waits_other_id_does_not() {
        let locks = Arc::new(AggregateLocks::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let held = locks.acquire(a).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(b)).await;
        assert!(other.is_ok());
        drop(other);

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(a)).await;
        assert!(same.is_err());

        drop(held);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(a)).await;
        assert!(same.is_ok());
    }
}
