//! # Workers
//!
//! A fixed pool of tasks taking keys from a [`WorkQueue`] and handing them to
//! a reconciler. The queue guarantees a key is held by one worker at a time.
//!
//! After each reconcile:
//! - success forgets the key's backoff and schedules the requested requeue
//! - a conflict re-adds the key immediately
//! - any other error re-adds the key after its next backoff delay

use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::Reconcile;
use crate::observability::metrics;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

/// Run `concurrency` workers until the queue shuts down
pub async fn run_workers(queue: WorkQueue, reconciler: Arc<dyn Reconcile>, concurrency: usize) {
    let concurrency = concurrency.max(1);
    info!(
        kind = reconciler.kind(),
        queue = queue.name(),
        concurrency,
        "Starting workers"
    );
    let mut workers = JoinSet::new();
    for id in 0..concurrency {
        let queue = queue.clone();
        let reconciler = reconciler.clone();
        let span = tracing::debug_span!("worker", queue = queue.name(), id);
        workers.spawn(
            async move { while process_next(&queue, reconciler.as_ref()).await {} }.instrument(span),
        );
    }
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Worker task failed");
        }
    }
    info!(queue = queue.name(), "Workers stopped");
}

/// Process one key. Returns `false` once the queue is shut down.
pub async fn process_next(queue: &WorkQueue, reconciler: &dyn Reconcile) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match reconciler.reconcile(&key).await {
        Ok(action) => {
            queue.forget(&key).await;
            if let Some(delay) = action.requeue_after {
                debug!(key = %key, delay_ms = delay.as_millis(), "Requeue scheduled");
                metrics::increment_requeues(queue.name(), "scheduled");
                queue.add_after(key.clone(), delay);
            }
        }
        Err(e) if e.is_conflict() => {
            debug!(key = %key, "Conflict, requeueing immediately");
            metrics::increment_requeues(queue.name(), "conflict");
            queue.add(key.clone()).await;
        }
        Err(e) => {
            let delay = queue.add_rate_limited(key.clone()).await;
            warn!(
                key = %key,
                error = %e,
                class = e.class(),
                retry_in_ms = delay.as_millis(),
                "Reconcile failed, backing off"
            );
            metrics::increment_requeues(queue.name(), e.class());
        }
    }

    queue.done(&key).await;
    true
}
