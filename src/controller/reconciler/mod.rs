//! # Reconciler
//!
//! One reconcile algorithm shared by every kind. A kind plugs in a
//! [`ReconcileStrategy`] that knows how to converge and clean up its external
//! resources; the loop owns everything else.
//!
//! ## Reconciliation Flow
//!
//! 1. Load the record by key. A missing record is already deleted.
//! 2. Work on a clone; the loaded copy becomes the persistence baseline.
//! 3. Deleting: run cleanup, then drop the finalizer once nothing is left.
//! 4. Otherwise:
//!    - initialize conditions
//!    - prepare the kind
//!    - resolve the sink
//!    - ensure the finalizer
//!    - converge
//!    - persist status
//! 5. A resource version conflict re-runs the pass from a fresh read, a
//!    bounded number of times.
//!
//! ## Module Structure
//!
//! - `types.rs` - Resource capabilities and pass outcomes
//! - `store.rs` - Object store seam
//! - `pass.rs` - Baseline-checked persistence within a pass
//! - `events.rs` - Kubernetes Events for outcomes

pub mod events;
pub mod pass;
pub mod store;
pub mod types;

pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use pass::Pass;
pub use store::{ObjectStore, StoreError};
pub use types::{Action, Cleanup, ManagedResource};

use crate::controller::conditions::{ConditionSet, SINK_RESOLVED};
use crate::controller::error::{ReconcileError, ReconcileResult};
use crate::controller::finalizer;
use crate::controller::queue::ObjectKey;
use crate::controller::sink::SinkResolver;
use crate::observability::metrics;
use async_trait::async_trait;
use events::{REASON_INTERNAL_ERROR, REASON_UPDATED, REASON_UPDATE_FAILED};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Kind-specific part of reconciliation
#[async_trait]
pub trait ReconcileStrategy<K: ManagedResource>: Send + Sync {
    /// Finalizer guarding this kind's external resources
    fn finalizer(&self) -> &str;

    /// Conditions whose conjunction is `Ready`
    fn conditions(&self) -> ConditionSet;

    /// Runs before sink resolution. Failures are recorded as conditions by
    /// the strategy itself.
    async fn prepare(&self, obj: &mut K) -> ReconcileResult<()> {
        let _ = obj;
        Ok(())
    }

    /// Bring external state in line with `obj` and mark conditions.
    ///
    /// Identifiers must be checkpointed through `pass` before the external
    /// call that depends on them.
    async fn converge(&self, obj: &mut K, pass: &mut Pass<'_, K>) -> ReconcileResult<Action>;

    /// Remove external state owned by `obj`
    async fn cleanup(&self, obj: &mut K, pass: &mut Pass<'_, K>) -> ReconcileResult<Cleanup>;
}

/// Anything the worker pool can drive by key
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Used in logs and metrics
    fn kind(&self) -> &str;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action>;
}

pub struct Reconciler<K: ManagedResource, S> {
    kind: String,
    store: Arc<dyn ObjectStore<K>>,
    sinks: Arc<dyn SinkResolver>,
    events: Arc<dyn EventPublisher>,
    strategy: S,
    max_conflict_retries: u32,
}

impl<K: ManagedResource, S> std::fmt::Debug for Reconciler<K, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("kind", &self.kind)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl<K, S> Reconciler<K, S>
where
    K: ManagedResource,
    S: ReconcileStrategy<K>,
{
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        sinks: Arc<dyn SinkResolver>,
        events: Arc<dyn EventPublisher>,
        strategy: S,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            store,
            sinks,
            events,
            strategy,
            max_conflict_retries,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    async fn reconcile_once(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        let current = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(StoreError::NotFound(_)) => {
                debug!("Resource no longer exists");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e.into()),
        };

        let mut obj = current.clone();
        let mut pass = Pass::new(self.store.as_ref(), current);

        if finalizer::is_deleting(&obj) {
            self.finalize(&mut obj, &mut pass).await
        } else {
            self.apply(&mut obj, &mut pass).await
        }
    }

    async fn apply(&self, obj: &mut K, pass: &mut Pass<'_, K>) -> ReconcileResult<Action> {
        let conditions = self.strategy.conditions();
        let was_ready = obj
            .source_status()
            .is_some_and(|s| conditions.is_ready(&s.conditions));

        let generation = obj.meta().generation;
        let status = obj.source_status_mut();
        conditions.initialize(&mut status.conditions);
        status.observed_generation = generation;

        let outcome = self.converge(obj, pass).await;
        self.persist_status(obj, pass).await?;

        let is_ready = obj
            .source_status()
            .is_some_and(|s| conditions.is_ready(&s.conditions));
        if is_ready && !was_ready {
            self.record_ready_latency(obj);
        }

        match outcome {
            Ok(action) => Ok(action),
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                self.publish(obj, EventType::Warning, REASON_INTERNAL_ERROR, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn converge(&self, obj: &mut K, pass: &mut Pass<'_, K>) -> ReconcileResult<Action> {
        let conditions = self.strategy.conditions();
        self.strategy.prepare(obj).await?;

        let namespace = obj.namespace().unwrap_or_default();
        match self.sinks.resolve(obj.sink(), &namespace).await {
            Ok(uri) => {
                let status = obj.source_status_mut();
                status.sink_uri = Some(uri);
                conditions.mark_true(&mut status.conditions, SINK_RESOLVED);
            }
            Err(e) => {
                let status = obj.source_status_mut();
                status.sink_uri = None;
                conditions.mark_false(
                    &mut status.conditions,
                    SINK_RESOLVED,
                    e.reason(),
                    e.to_string(),
                );
                return Err(e.into());
            }
        }

        if finalizer::ensure_present(obj, self.strategy.finalizer()) {
            debug!(finalizer = self.strategy.finalizer(), "Adding finalizer");
            pass.checkpoint(obj).await?;
        }

        self.strategy.converge(obj, pass).await
    }

    async fn finalize(&self, obj: &mut K, pass: &mut Pass<'_, K>) -> ReconcileResult<Action> {
        if !finalizer::has(obj, self.strategy.finalizer()) {
            debug!("Deleting and no finalizer of ours is left");
            return Ok(Action::await_change());
        }

        match self.strategy.cleanup(obj, pass).await {
            Ok(Cleanup::Pending(action)) => {
                self.persist_status(obj, pass).await?;
                Ok(action)
            }
            Ok(Cleanup::Finished) => {
                // Status goes first so nothing is written after the finalizer
                // lets the record go.
                match self.persist_status(obj, pass).await {
                    Ok(()) | Err(ReconcileError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                finalizer::ensure_absent(obj, self.strategy.finalizer());
                match pass.persist_finalizers(obj).await {
                    Ok(_) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => {
                        if !matches!(e, StoreError::Conflict(_)) {
                            self.publish(
                                obj,
                                EventType::Warning,
                                REASON_UPDATE_FAILED,
                                Some(e.to_string()),
                            )
                            .await;
                        }
                        return Err(e.into());
                    }
                }
                info!("External resources removed, finalizer released");
                Ok(Action::await_change())
            }
            Err(e) => {
                self.persist_status(obj, pass).await?;
                self.publish(obj, EventType::Warning, REASON_INTERNAL_ERROR, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn persist_status(&self, obj: &K, pass: &mut Pass<'_, K>) -> ReconcileResult<()> {
        match pass.persist_status(obj).await {
            Ok(true) => {
                self.publish(obj, EventType::Normal, REASON_UPDATED, None).await;
                Ok(())
            }
            Ok(false) => Ok(()),
            // Conflicts are retried with a fresh read and not worth an event
            Err(StoreError::Conflict(m)) => Err(ReconcileError::Conflict(m)),
            Err(e) => {
                self.publish(obj, EventType::Warning, REASON_UPDATE_FAILED, Some(e.to_string()))
                    .await;
                Err(e.into())
            }
        }
    }

    fn record_ready_latency(&self, obj: &K) {
        let Some(created) = obj
            .meta()
            .creation_timestamp
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .and_then(|v| v.as_str().map(chrono::DateTime::parse_from_rfc3339))
            .and_then(Result::ok)
        else {
            return;
        };
        let elapsed = (chrono::Utc::now() - created.to_utc()).num_milliseconds().max(0);
        let seconds = f64::from(u32::try_from(elapsed).unwrap_or(u32::MAX)) / 1000.0;
        info!("Became ready after {seconds:.3}s");
        metrics::observe_ready_latency(&self.kind, seconds);
    }

    async fn publish(&self, obj: &K, type_: EventType, reason: &str, note: Option<String>) {
        self.events
            .publish(&obj.object_ref(&()), type_, reason, note)
            .await;
    }
}

#[async_trait]
impl<K, S> Reconcile for Reconciler<K, S>
where
    K: ManagedResource,
    S: ReconcileStrategy<K>,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        let span = info_span!("reconcile", kind = %self.kind, key = %key);
        async {
            let start = Instant::now();
            metrics::increment_reconciliations(&self.kind);

            let mut conflicts = 0;
            let result = loop {
                match self.reconcile_once(key).await {
                    Err(e) if e.is_conflict() && conflicts < self.max_conflict_retries => {
                        conflicts += 1;
                        debug!(attempt = conflicts, error = %e, "Re-running pass after conflict");
                    }
                    other => break other,
                }
            };

            metrics::observe_reconciliation_duration(&self.kind, start.elapsed().as_secs_f64());
            match &result {
                Ok(action) => debug!(requeue_after = ?action.requeue_after, "Reconcile finished"),
                Err(e) => {
                    metrics::increment_reconciliation_errors(&self.kind, e.class());
                    warn!(error = %e, class = e.class(), "Reconcile failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}
