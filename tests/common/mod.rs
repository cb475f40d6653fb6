//! Common test utilities for the reconcile integration tests
//!
//! Builders for source records and reconcilers wired to the in-memory fakes
//! from `cloud_source_controller::testing`.

#![allow(dead_code)]

use cloud_source_controller::controller::kinds::{PullSubscriptionStrategy, StorageStrategy};
use cloud_source_controller::controller::operation::{LocalRunner, OperationRunner};
use cloud_source_controller::controller::queue::ObjectKey;
use cloud_source_controller::controller::reconciler::{
    ManagedResource, ObjectStore, Reconcile, Reconciler,
};
use cloud_source_controller::controller::error::ReconcileResult;
use cloud_source_controller::controller::reconciler::Action;
use cloud_source_controller::crd::{
    CloudStorageSource, CloudStorageSourceSpec, ConditionStatus, Destination, KReference,
    PullSubscription, PullSubscriptionSpec,
};
use cloud_source_controller::provider::{NotificationSpec, SubscriptionSpec, TopicSpec};
use cloud_source_controller::testing::{
    FakeDataPlane, FakeProvider, FakeSinkResolver, FakeStore, RecordingEvents, StaticProject,
};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "default";
pub const PROJECT: &str = "proj";
pub const SINK_URI: &str = "http://event-display.default.svc.cluster.local/";
pub const IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(5);
pub const MAX_CONFLICT_RETRIES: u32 = 3;

pub fn sink_ref(name: &str) -> Destination {
    Destination {
        reference: Some(KReference {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            name: name.to_string(),
            namespace: None,
        }),
        uri: None,
    }
}

pub fn storage_source(name: &str, bucket: &str) -> CloudStorageSource {
    let mut source = CloudStorageSource::new(
        name,
        CloudStorageSourceSpec {
            bucket: bucket.to_string(),
            project: Some(PROJECT.to_string()),
            topic: Some(String::new()),
            event_types: vec!["finalize".to_string(), "delete".to_string()],
            object_name_prefix: None,
            custom_attributes: Default::default(),
            sink: sink_ref("event-display"),
            secret: None,
        },
    );
    source.metadata.namespace = Some(NAMESPACE.to_string());
    source
}

pub fn pull_subscription(name: &str, topic: &str) -> PullSubscription {
    let mut subscription = PullSubscription::new(
        name,
        PullSubscriptionSpec {
            topic: topic.to_string(),
            project: Some(PROJECT.to_string()),
            sink: sink_ref("event-display"),
            ..PullSubscriptionSpec::default()
        },
    );
    subscription.metadata.namespace = Some(NAMESPACE.to_string());
    subscription
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, name)
}

pub fn condition<K: ManagedResource>(obj: &K, condition_type: &str) -> ConditionStatus {
    obj.source_status()
        .map_or(ConditionStatus::Unknown, |s| s.conditions.status_of(condition_type))
}

pub fn reason<K: ManagedResource>(obj: &K, condition_type: &str) -> Option<String> {
    obj.source_status()
        .and_then(|s| s.conditions.get(condition_type))
        .and_then(|c| c.reason.clone())
}

/// CloudStorageSource reconciler over fakes
pub struct StorageHarness {
    pub store: Arc<FakeStore<CloudStorageSource>>,
    pub subscriptions: Arc<FakeStore<PullSubscription>>,
    pub topics: Arc<FakeProvider<TopicSpec>>,
    pub notifications: Arc<FakeProvider<NotificationSpec>>,
    pub sinks: Arc<FakeSinkResolver>,
    pub events: Arc<RecordingEvents>,
    pub reconciler: Reconciler<CloudStorageSource, StorageStrategy>,
}

impl StorageHarness {
    /// Notification operations run in process against `notifications`
    pub fn new() -> Self {
        let notifications = Arc::new(FakeProvider::<NotificationSpec>::named("notification"));
        let runner = Arc::new(LocalRunner::new(notifications.clone()));
        Self::build(notifications, runner)
    }

    pub fn with_runner(runner: Arc<dyn OperationRunner>) -> Self {
        let notifications = Arc::new(FakeProvider::<NotificationSpec>::named("notification"));
        Self::build(notifications, runner)
    }

    fn build(
        notifications: Arc<FakeProvider<NotificationSpec>>,
        runner: Arc<dyn OperationRunner>,
    ) -> Self {
        let store = Arc::new(FakeStore::<CloudStorageSource>::new());
        let subscriptions = Arc::new(FakeStore::<PullSubscription>::new());
        let topics = Arc::new(FakeProvider::<TopicSpec>::named("topic"));
        let sinks = Arc::new(FakeSinkResolver::resolving(SINK_URI));
        let events = Arc::new(RecordingEvents::default());

        let strategy = StorageStrategy::new(
            topics.clone(),
            subscriptions.clone(),
            runner,
            Arc::new(StaticProject::new(PROJECT)),
            IN_PROGRESS_REQUEUE,
        );
        let reconciler = Reconciler::new(
            store.clone(),
            sinks.clone(),
            events.clone(),
            strategy,
            MAX_CONFLICT_RETRIES,
        );
        Self {
            store,
            subscriptions,
            topics,
            notifications,
            sinks,
            events,
            reconciler,
        }
    }

    pub fn seed(&self, source: CloudStorageSource) -> ObjectKey {
        let stored = self.store.insert(source);
        ObjectKey::from_resource(&stored)
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        self.reconciler.reconcile(key).await
    }

    pub fn current(&self, key: &ObjectKey) -> CloudStorageSource {
        self.store.current(key).expect("record exists")
    }

    /// Change the spec the way a user edit would, bumping the generation
    pub async fn edit_spec(
        &self,
        key: &ObjectKey,
        edit: impl FnOnce(&mut CloudStorageSourceSpec),
    ) {
        let mut source = self.current(key);
        edit(&mut source.spec);
        self.store.update(&source).await.expect("spec update");
    }

    /// Report the owned PullSubscription as ready, as its own controller would
    pub async fn mark_subscription_ready(&self, key: &ObjectKey) {
        let mut subscription = self.subscriptions.current(key).expect("owned subscription");
        subscription.status_mut().source.conditions.set(
            "Ready",
            ConditionStatus::True,
            None,
            None,
        );
        self.subscriptions
            .update_status(&subscription)
            .await
            .expect("status update");
    }
}

/// PullSubscription reconciler over fakes
pub struct PullSubscriptionHarness {
    pub store: Arc<FakeStore<PullSubscription>>,
    pub subscriptions: Arc<FakeProvider<SubscriptionSpec>>,
    pub data_plane: Arc<FakeDataPlane>,
    pub sinks: Arc<FakeSinkResolver>,
    pub events: Arc<RecordingEvents>,
    pub reconciler: Reconciler<PullSubscription, PullSubscriptionStrategy>,
}

impl PullSubscriptionHarness {
    pub fn new(adapter_ready: bool) -> Self {
        let store = Arc::new(FakeStore::<PullSubscription>::new());
        let subscriptions = Arc::new(FakeProvider::<SubscriptionSpec>::named("subscription"));
        let data_plane = Arc::new(FakeDataPlane::new(adapter_ready));
        let sinks = Arc::new(FakeSinkResolver::resolving(SINK_URI));
        let events = Arc::new(RecordingEvents::default());

        let strategy = PullSubscriptionStrategy::new(
            subscriptions.clone(),
            data_plane.clone(),
            sinks.clone(),
            Arc::new(StaticProject::new(PROJECT)),
        );
        let reconciler = Reconciler::new(
            store.clone(),
            sinks.clone(),
            events.clone(),
            strategy,
            MAX_CONFLICT_RETRIES,
        );
        Self {
            store,
            subscriptions,
            data_plane,
            sinks,
            events,
            reconciler,
        }
    }

    pub fn seed(&self, subscription: PullSubscription) -> ObjectKey {
        let stored = self.store.insert(subscription);
        ObjectKey::from_resource(&stored)
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        self.reconciler.reconcile(key).await
    }

    pub fn current(&self, key: &ObjectKey) -> PullSubscription {
        self.store.current(key).expect("record exists")
    }
}
