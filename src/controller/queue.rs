//! # Work Queue
//!
//! De-duplicating queue of resource keys shared by a controller's workers.
//!
//! A key is never handed to two workers at once. Re-adding a key that is
//! being processed only marks it dirty; it is queued again when the worker
//! calls [`WorkQueue::done`]. A key that is already waiting is not queued a
//! second time.

use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

/// Namespace-qualified name of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(ToString::to_string),
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in FIFO order
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing: everything in `queue`, plus in-flight keys
    /// re-added since they were handed out
    dirty: HashSet<ObjectKey>,
    /// Keys currently held by a worker
    processing: HashSet<ObjectKey>,
    backoff: HashMap<ObjectKey, ExponentialBackoff>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    backoff_start: Duration,
    backoff_max: Duration,
}

/// Cloneable handle to a shared work queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(name: &str, backoff_start: Duration, backoff_max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                backoff_start,
                backoff_max,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing a reconcile
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        metrics::increment_queue_adds(&self.inner.name);
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, key = %key, "Key in flight, marked dirty");
            return;
        }
        state.queue.push_back(key);
        metrics::set_queue_depth(&self.inner.name, state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Add `key` after its next backoff delay. Returns the delay used.
    pub async fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.inner.state.lock().await;
            state
                .backoff
                .entry(key.clone())
                .or_insert_with(|| {
                    ExponentialBackoff::new(self.inner.backoff_start, self.inner.backoff_max)
                })
                .next_backoff()
        };
        self.add_after(key, delay);
        delay
    }

    /// Drop the backoff history of `key`
    pub async fn forget(&self, key: &ObjectKey) {
        self.inner.state.lock().await.backoff.remove(key);
    }

    /// Failed attempts recorded for `key` since it was last forgotten
    pub async fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .backoff
            .get(key)
            .map_or(0, ExponentialBackoff::attempts)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add is not missed
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::set_queue_depth(&self.inner.name, state.queue.len());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key`. If it was re-added while in flight it is queued again.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            metrics::set_queue_depth(&self.inner.name, state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Keys waiting to be handed out
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys. Workers finish their current key and exit.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }
}
