//! # Watches
//!
//! Record changes become keys in a [`WorkQueue`]. The primary kind is
//! watched through a reflector whose cache drives the periodic resync;
//! owned kinds are mapped back to their controlling record.

use crate::controller::queue::{ObjectKey, WorkQueue};
use futures::{Stream, StreamExt};
use kube::api::Api;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Decides which records of the primary kind a queue is responsible for
pub type KeyFilter<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

/// Accept every record
pub fn accept_all<K>() -> KeyFilter<K> {
    Arc::new(|_: &K| true)
}

/// Watch the primary kind.
///
/// Returns the reflector cache and the future driving the watch and the
/// resync timer. The future runs until the queue shuts down.
pub fn watch_primary<K>(
    api: Api<K>,
    config: watcher::Config,
    queue: WorkQueue,
    filter: KeyFilter<K>,
    resync_period: Duration,
) -> (Store<K>, impl Future<Output = ()> + Send + 'static)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream =
        reflector::reflector(writer, watcher(api, config).default_backoff()).applied_objects();

    let span = tracing::info_span!("controller.watch", kind = %K::kind(&()), queue = queue.name());
    let cache = reader.clone();
    let fut = async move {
        info!("Starting watch");
        let events = enqueue_applied(stream, queue.clone(), filter.clone());
        let resync = resync_loop(cache, queue, filter, resync_period);
        tokio::select! {
            () = events => warn!("Watch stream ended"),
            () = resync => debug!("Resync stopped"),
        }
    }
    .instrument(span);
    (reader, fut)
}

async fn enqueue_applied<K, S>(stream: S, queue: WorkQueue, filter: KeyFilter<K>)
where
    K: Resource + Debug,
    S: Stream<Item = Result<K, watcher::Error>>,
{
    futures::pin_mut!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(obj) if filter(&obj) => queue.add(ObjectKey::from_resource(&obj)).await,
            Ok(obj) => debug!(name = %obj.name_any(), "Record not handled by this queue"),
            Err(e) => warn!(error = %e, "Watch error, retrying with backoff"),
        }
        if queue.is_shutting_down().await {
            break;
        }
    }
}

async fn resync_loop<K>(cache: Store<K>, queue: WorkQueue, filter: KeyFilter<K>, period: Duration)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    if period.is_zero() {
        std::future::pending::<()>().await;
    }
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately; the initial listing already enqueued everything
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if queue.is_shutting_down().await {
            return;
        }
        let records = cache.state();
        debug!(count = records.len(), "Resync");
        for obj in records {
            if filter(&*obj) {
                queue.add(ObjectKey::from_resource(&*obj)).await;
            }
        }
    }
}

/// Enqueue the controlling record of every changed `O`.
///
/// Owners are looked up in the primary cache, so an owner the queue's filter
/// rejects is left alone. An owner not cached yet arrives through the primary
/// watch.
pub async fn fan_in_owned<O, K>(
    api: Api<O>,
    config: watcher::Config,
    owners: Store<K>,
    queue: WorkQueue,
    filter: KeyFilter<K>,
) where
    O: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let span = tracing::info_span!(
        "controller.watch.owned",
        kind = %O::kind(&()),
        owner = %K::kind(&()),
        queue = queue.name()
    );
    async move {
        let stream = watcher(api, config).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(obj) => {
                    if let Some(key) = owner_key(&obj, &owners, filter.as_ref()) {
                        queue.add(key).await;
                    }
                }
                Err(e) => warn!(error = %e, "Owned watch error, retrying with backoff"),
            }
            if queue.is_shutting_down().await {
                break;
            }
        }
    }
    .instrument(span)
    .await;
}

/// Key of the cached record of kind `K` controlling `obj`
pub fn owner_key<O, K>(
    obj: &O,
    owners: &Store<K>,
    filter: &(dyn Fn(&K) -> bool + Send + Sync),
) -> Option<ObjectKey>
where
    O: Resource,
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let owner = obj.owner_references().iter().find(|r| {
        r.controller == Some(true) && r.kind == K::kind(&()) && r.api_version == K::api_version(&())
    })?;
    let namespace = obj.namespace();
    let mut reference = ObjectRef::<K>::new(&owner.name);
    if let Some(ns) = namespace.as_deref() {
        reference = reference.within(ns);
    }
    let cached = owners.get(&reference)?;
    if cached.uid().as_deref() != Some(owner.uid.as_str()) || !filter(&*cached) {
        return None;
    }
    Some(ObjectKey::new(namespace.as_deref(), &owner.name))
}
