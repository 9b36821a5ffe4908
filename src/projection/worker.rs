//! Projection Worker
//!
//! Background task that receives committed batches and feeds them to the
//! projection service, one at a time. A batch that keeps failing is
//! reported on the failure channel and its account is marked stalled; the
//! worker re-drives stalled accounts from the event store on a timer until
//! the read model catches up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::event_store::StoredEvent;

use super::ProjectionService;

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Events committed by one append, addressed to one account
#[derive(Debug, Clone)]
pub struct ProjectionBatch {
    pub aggregate_id: Uuid,
    pub events: Vec<StoredEvent>,
}

/// A batch the worker gave up on
#[derive(Debug, Clone)]
pub struct ProjectionFailure {
    pub aggregate_id: Uuid,
    pub first_sequence: Option<i64>,
    pub attempts: u32,
    pub error: String,
}

/// Retry settings for projection delivery
#[derive(Debug, Clone, Copy)]
pub struct ProjectionRetry {
    pub max_retries: u32,
    pub delay: Duration,
    /// How often stalled accounts are re-driven from the event store
    pub redrive_interval: Duration,
}

impl Default for ProjectionRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_millis(50),
            redrive_interval: Duration::from_secs(1),
        }
    }
}

/// Write side handle for delivering batches to the worker
#[derive(Debug, Clone)]
pub struct ProjectionSender {
    tx: mpsc::UnboundedSender<ProjectionBatch>,
}

impl ProjectionSender {
    /// Hand a committed batch to the worker. Returns `false` once the worker
    /// has stopped; the events stay durable and a rebuild recovers them.
    pub fn deliver(&self, batch: ProjectionBatch) -> bool {
        let aggregate_id = batch.aggregate_id;
        if self.tx.send(batch).is_err() {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                "Projection worker stopped, batch not delivered"
            );
            return false;
        }
        true
    }
}

/// Running worker
pub struct ProjectionWorker {
    failures: broadcast::Sender<ProjectionFailure>,
}

impl ProjectionWorker {
    /// Start the worker on the current tokio runtime.
    ///
    /// The worker stops once every `ProjectionSender` has been dropped.
    pub fn spawn(service: Arc<ProjectionService>, retry: ProjectionRetry) -> (ProjectionSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        tokio::spawn(run(service, rx, retry, failures.clone()));
        tracing::info!("Projection worker started");

        (ProjectionSender { tx }, Self { failures })
    }

    /// Receive batches the worker could not project
    pub fn failures(&self) -> broadcast::Receiver<ProjectionFailure> {
        self.failures.subscribe()
    }
}

async fn run(
    service: Arc<ProjectionService>,
    mut rx: mpsc::UnboundedReceiver<ProjectionBatch>,
    retry: ProjectionRetry,
    failures: broadcast::Sender<ProjectionFailure>,
) {
    let mut stalled: HashSet<Uuid> = HashSet::new();
    let mut redrive = tokio::time::interval(retry.redrive_interval);
    redrive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                // A successful batch also folds any gap left by an earlier failure
                if process(&service, &batch, retry, &failures).await {
                    stalled.remove(&batch.aggregate_id);
                } else {
                    stalled.insert(batch.aggregate_id);
                }
            }
            _ = redrive.tick(), if !stalled.is_empty() => {
                redrive_stalled(&service, &mut stalled).await;
            }
        }
    }

    if !stalled.is_empty() {
        tracing::warn!(
            stalled = stalled.len(),
            "Projection worker stopped with accounts behind the event log"
        );
    }
    tracing::info!("Projection worker stopped");
}

/// Project one batch, retrying with delay. Returns `false` when the worker
/// gave up on it.
async fn process(
    service: &ProjectionService,
    batch: &ProjectionBatch,
    retry: ProjectionRetry,
    failures: &broadcast::Sender<ProjectionFailure>,
) -> bool {
    let max_attempts = retry.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match service.apply(batch.aggregate_id, &batch.events).await {
            Ok(_) => return true,
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    aggregate_id = %batch.aggregate_id,
                    attempt = attempt,
                    error = %e,
                    "Projection failed, retrying"
                );
                tokio::time::sleep(retry.delay * attempt).await;
            }
            Err(e) => {
                tracing::error!(
                    aggregate_id = %batch.aggregate_id,
                    attempts = attempt,
                    error = %e,
                    "Projection failed, account stalled until re-driven"
                );
                // Nobody listening is fine
                let _ = failures.send(ProjectionFailure {
                    aggregate_id: batch.aggregate_id,
                    first_sequence: batch.events.first().map(|e| e.sequence),
                    attempts: attempt,
                    error: e.to_string(),
                });
                return false;
            }
        }
    }
}

async fn redrive_stalled(service: &ProjectionService, stalled: &mut HashSet<Uuid>) {
    let ids: Vec<Uuid> = stalled.iter().copied().collect();
    for aggregate_id in ids {
        match service.catch_up(aggregate_id).await {
            Ok(applied) => {
                stalled.remove(&aggregate_id);
                tracing::info!(
                    aggregate_id = %aggregate_id,
                    applied = applied,
                    "Stalled projection caught up"
                );
            }
            Err(e) => {
                tracing::warn!(
                    aggregate_id = %aggregate_id,
                    error = %e,
                    "Stalled projection still failing"
                );
            }
        }
    }
}
