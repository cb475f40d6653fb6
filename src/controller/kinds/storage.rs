//! CloudStorageSource strategy.
//!
//! Converges, in order: the topic, the PullSubscription record the source
//! owns, and the bucket notification publishing to the topic. Cleanup walks
//! the same chain backwards.

use super::{is_controlled_by, resolve_project};
use crate::constants::{CE_TYPE_ATTRIBUTE, CE_TYPE_STORAGE};
use crate::controller::conditions::{ConditionSet, READY, SINK_RESOLVED};
use crate::controller::error::{ReconcileError, ReconcileResult};
use crate::controller::lifecycle::{generate_topic_name, get_or_create, get_or_delete, Ensured};
use crate::controller::operation::{
    OperationAction, OperationArgs, OperationHandle, OperationOwner, OperationRunner,
    OperationState,
};
use crate::controller::queue::ObjectKey;
use crate::controller::reconciler::{
    Action, Cleanup, ManagedResource, ObjectStore, Pass, ReconcileStrategy, StoreError,
};
use crate::crd::{CloudStorageSource, ConditionStatus, PullSubscription, PullSubscriptionSpec};
use crate::provider::{storage_event_types, ExternalResourceProvider, ProjectResolver, TopicSpec};
use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

pub const TOPIC_READY: &str = "TopicReady";
pub const PULL_SUBSCRIPTION_READY: &str = "PullSubscriptionReady";
pub const NOTIFICATION_READY: &str = "NotificationReady";

pub const CONDITIONS: ConditionSet = ConditionSet::new(&[
    SINK_RESOLVED,
    TOPIC_READY,
    PULL_SUBSCRIPTION_READY,
    NOTIFICATION_READY,
]);

/// Pub/Sub topic ids: a letter, then 2-254 of letters, digits and `-_.~+%`
static TOPIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9\-_.~+%]{2,254}$").expect("valid topic name pattern")
});

pub type TopicProvider = dyn ExternalResourceProvider<Spec = TopicSpec>;

pub struct StorageStrategy {
    topics: Arc<TopicProvider>,
    subscriptions: Arc<dyn ObjectStore<PullSubscription>>,
    operations: Arc<dyn OperationRunner>,
    projects: Arc<dyn ProjectResolver>,
    in_progress_requeue: Duration,
    finalizer: String,
}

impl std::fmt::Debug for StorageStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageStrategy")
            .field("finalizer", &self.finalizer)
            .field("in_progress_requeue", &self.in_progress_requeue)
            .finish_non_exhaustive()
    }
}

impl StorageStrategy {
    pub fn new(
        topics: Arc<TopicProvider>,
        subscriptions: Arc<dyn ObjectStore<PullSubscription>>,
        operations: Arc<dyn OperationRunner>,
        projects: Arc<dyn ProjectResolver>,
        in_progress_requeue: Duration,
    ) -> Self {
        Self {
            topics,
            subscriptions,
            operations,
            projects,
            in_progress_requeue,
            finalizer: super::finalizer_name::<CloudStorageSource>(),
        }
    }

    fn project(obj: &CloudStorageSource) -> ReconcileResult<String> {
        obj.status
            .as_ref()
            .and_then(|s| s.source.project_id.clone())
            .ok_or_else(|| ReconcileError::Permanent("project is required but not set".into()))
    }

    fn mark_false(obj: &mut CloudStorageSource, condition: &str, reason: &str, message: &str) {
        let status = obj.status_mut();
        CONDITIONS.mark_false(&mut status.source.conditions, condition, reason, message);
    }

    /// Topic named in spec, if any
    fn requested_topic(obj: &CloudStorageSource) -> Option<String> {
        obj.spec.topic.clone().filter(|t| !t.trim().is_empty())
    }

    fn has_notification(obj: &CloudStorageSource) -> bool {
        obj.status
            .as_ref()
            .and_then(|s| s.notification_id.as_deref())
            .is_some_and(|id| !id.is_empty())
    }

    /// The recorded topic is no longer the one to publish to: spec names a
    /// different one, or spec stopped naming a topic this source only adopted
    fn topic_is_stale(obj: &CloudStorageSource) -> bool {
        let Some(status) = obj.status.as_ref() else {
            return false;
        };
        let Some(recorded) = status.topic.as_deref().filter(|t| !t.is_empty()) else {
            return false;
        };
        match Self::requested_topic(obj) {
            Some(requested) => requested != recorded,
            None => !status.topic_owned,
        }
    }

    fn validate_topic(obj: &mut CloudStorageSource, topic: &str) -> ReconcileResult<()> {
        if TOPIC_NAME.is_match(topic) {
            return Ok(());
        }
        let message = format!("invalid topic name {topic}");
        Self::mark_false(obj, TOPIC_READY, "InvalidTopicName", &message);
        Err(ReconcileError::Permanent(message))
    }

    async fn ensure_topic(
        &self,
        obj: &mut CloudStorageSource,
        pass: &mut Pass<'_, CloudStorageSource>,
        project: &str,
    ) -> ReconcileResult<String> {
        let topic = Self::requested_topic(obj)
            .or_else(|| obj.status.as_ref().and_then(|s| s.topic.clone()));
        let generated = topic.is_none();
        let topic = topic.unwrap_or_else(generate_topic_name);
        Self::validate_topic(obj, &topic)?;

        // The name must survive a crash before anything is created under it.
        // Generated names are unique to this source, so it owns them up front.
        let status = obj.status_mut();
        status.topic = Some(topic.clone());
        status.topic_owned |= generated;
        pass.checkpoint(obj).await?;

        let spec = TopicSpec {
            project: project.to_string(),
            name: topic.clone(),
        };
        match get_or_create(self.topics.as_ref(), &spec, Some(&topic)).await {
            Ok(ensured) => {
                debug!(topic = ensured.id(), "Topic ready");
                let status = obj.status_mut();
                if matches!(ensured, Ensured::Created(_)) {
                    status.topic_owned = true;
                }
                CONDITIONS.mark_true(&mut status.source.conditions, TOPIC_READY);
                Ok(topic)
            }
            Err(e) => {
                Self::mark_false(obj, TOPIC_READY, "TopicFailed", &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Delete the recorded topic if this source created it, then drop it
    /// from status
    async fn release_topic(
        &self,
        obj: &mut CloudStorageSource,
        project: &str,
    ) -> ReconcileResult<()> {
        let status = obj.status.clone().unwrap_or_default();
        if let Some(topic) = status.topic.filter(|t| !t.is_empty()) {
            if status.topic_owned {
                let spec = TopicSpec {
                    project: project.to_string(),
                    name: topic.clone(),
                };
                if let Err(e) = get_or_delete(self.topics.as_ref(), &spec, Some(&topic)).await {
                    Self::mark_false(obj, TOPIC_READY, "TopicDeleteFailed", &e.to_string());
                    return Err(e.into());
                }
            } else {
                debug!(topic = %topic, "Leaving adopted topic in place");
            }
        }
        let status = obj.status_mut();
        status.topic = None;
        status.topic_owned = false;
        Ok(())
    }

    /// Move off a stale topic: the notification publishing to it goes
    /// first, then the topic itself
    async fn retire_stale_topic(
        &self,
        obj: &mut CloudStorageSource,
        pass: &mut Pass<'_, CloudStorageSource>,
        project: &str,
    ) -> ReconcileResult<Option<Action>> {
        if !Self::topic_is_stale(obj) {
            return Ok(None);
        }
        if let Some(action) = self.settle_create(obj).await? {
            return Ok(Some(action));
        }
        if Self::has_notification(obj) {
            if let Some(action) = self.remove_notification(obj, pass, project).await? {
                return Ok(Some(action));
            }
        }
        info!(
            topic = obj.status.as_ref().and_then(|s| s.topic.as_deref()).unwrap_or_default(),
            "Releasing the previous topic"
        );
        self.release_topic(obj, project).await?;
        pass.checkpoint(obj).await?;
        Ok(None)
    }

    fn desired_subscription(
        obj: &CloudStorageSource,
        project: &str,
        topic: &str,
    ) -> ReconcileResult<PullSubscription> {
        let owner = obj
            .controller_owner_ref(&())
            .ok_or_else(|| ReconcileError::Permanent("record has no name or uid".into()))?;
        let mut subscription = PullSubscription::new(
            &obj.name_any(),
            PullSubscriptionSpec {
                topic: topic.to_string(),
                project: Some(project.to_string()),
                sink: obj.spec.sink.clone(),
                transformer: None,
                ack_deadline_seconds: None,
                retain_acked_messages: false,
                retention_duration: None,
            },
        );
        subscription.metadata = ObjectMeta {
            name: Some(obj.name_any()),
            namespace: obj.namespace(),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        };
        Ok(subscription)
    }

    async fn ensure_subscription(
        &self,
        obj: &mut CloudStorageSource,
        project: &str,
        topic: &str,
    ) -> ReconcileResult<()> {
        let desired = Self::desired_subscription(obj, project, topic)?;
        let key = ObjectKey::from_resource(obj);
        let uid = obj.uid().unwrap_or_default();

        let current = match self.subscriptions.get(&key).await {
            Ok(existing) if !is_controlled_by(&existing, &uid) => {
                let message = format!("PullSubscription {key} is not owned by this source");
                Self::mark_false(obj, PULL_SUBSCRIPTION_READY, "NotOwned", &message);
                return Err(ReconcileError::Permanent(message));
            }
            Ok(existing) if existing.spec == desired.spec => Ok(existing),
            Ok(mut existing) => {
                info!(subscription = %key, "Updating owned PullSubscription");
                existing.spec = desired.spec;
                self.subscriptions.update(&existing).await
            }
            Err(StoreError::NotFound(_)) => {
                info!(subscription = %key, "Creating owned PullSubscription");
                self.subscriptions.create(&desired).await
            }
            Err(e) => Err(e),
        };
        let subscription = match current {
            Ok(subscription) => subscription,
            Err(e) => {
                Self::mark_false(obj, PULL_SUBSCRIPTION_READY, "PullSubscriptionFailed", &e.to_string());
                return Err(e.into());
            }
        };

        let ready = subscription
            .status
            .as_ref()
            .and_then(|s| s.source.conditions.get(READY).cloned());
        let conditions = &mut obj.status_mut().source.conditions;
        match ready {
            Some(c) if c.status == ConditionStatus::True => {
                CONDITIONS.mark_true(conditions, PULL_SUBSCRIPTION_READY);
            }
            Some(c) if c.status == ConditionStatus::False => {
                CONDITIONS.mark_false(
                    conditions,
                    PULL_SUBSCRIPTION_READY,
                    "PullSubscriptionNotReady",
                    c.message.unwrap_or_default(),
                );
            }
            _ => {
                CONDITIONS.mark_unknown(
                    conditions,
                    PULL_SUBSCRIPTION_READY,
                    "PullSubscriptionNotReady",
                    "the PullSubscription is not ready yet",
                );
            }
        }
        Ok(())
    }

    fn operation_args(
        obj: &CloudStorageSource,
        action: OperationAction,
        project: &str,
        topic: &str,
    ) -> ReconcileResult<OperationArgs> {
        let event_types =
            storage_event_types(&obj.spec.event_types).map_err(ReconcileError::Permanent)?;
        let mut custom_attributes = obj.spec.custom_attributes.clone();
        custom_attributes.insert(CE_TYPE_ATTRIBUTE.to_string(), CE_TYPE_STORAGE.to_string());
        Ok(OperationArgs {
            action,
            project: project.to_string(),
            bucket: obj.spec.bucket.clone(),
            topic: topic.to_string(),
            event_types,
            object_name_prefix: obj.spec.object_name_prefix.clone(),
            custom_attributes,
            notification_id: obj.status.as_ref().and_then(|s| s.notification_id.clone()),
            credentials: obj.spec.secret.clone(),
        })
    }

    async fn ensure_notification(
        &self,
        obj: &mut CloudStorageSource,
        project: &str,
        topic: &str,
    ) -> ReconcileResult<Action> {
        let args = Self::operation_args(obj, OperationAction::Create, project, topic)?;
        let handle = self.operations.submit(&OperationOwner::of(obj), &args).await?;

        match self.operations.poll(&handle).await? {
            OperationState::Running => {
                // Re-checking a recorded notification leaves its condition alone
                if !Self::has_notification(obj) {
                    CONDITIONS.mark_unknown(
                        &mut obj.status_mut().source.conditions,
                        NOTIFICATION_READY,
                        "NotificationPending",
                        format!("waiting for {}", handle.name),
                    );
                }
                Ok(Action::requeue(self.in_progress_requeue))
            }
            OperationState::Succeeded(result) => {
                let status = obj.status_mut();
                status.notification_id = Some(result.external_id);
                CONDITIONS.mark_true(&mut status.source.conditions, NOTIFICATION_READY);
                // The next pass submits a fresh create that re-checks the id
                self.operations.forget(&handle).await?;
                Ok(Action::await_change())
            }
            OperationState::Failed(result) => {
                let message = failure_message(result.as_ref().map(|r| r.error.as_str()), &handle);
                Self::mark_false(obj, NOTIFICATION_READY, "NotificationFailed", &message);
                self.operations.forget(&handle).await?;
                Err(ReconcileError::Permanent(message))
            }
        }
    }

    /// Wait out a create an earlier pass submitted, recording the
    /// notification it made so it can be removed
    async fn settle_create(
        &self,
        obj: &mut CloudStorageSource,
    ) -> ReconcileResult<Option<Action>> {
        let owner = OperationOwner::of(obj);
        let Some(state) = self.operations.find(&owner, OperationAction::Create).await? else {
            return Ok(None);
        };
        let handle = OperationHandle::for_owner(&owner, OperationAction::Create);
        match state {
            OperationState::Running => {
                CONDITIONS.mark_unknown(
                    &mut obj.status_mut().source.conditions,
                    NOTIFICATION_READY,
                    "NotificationPending",
                    format!("waiting for {} before removing the notification", handle.name),
                );
                return Ok(Some(Action::requeue(self.in_progress_requeue)));
            }
            OperationState::Succeeded(result) if !result.external_id.is_empty() => {
                debug!(
                    notification = %result.external_id,
                    "Recording notification from finished create"
                );
                obj.status_mut().notification_id = Some(result.external_id);
            }
            OperationState::Succeeded(_) | OperationState::Failed(_) => {}
        }
        self.operations.forget(&handle).await?;
        Ok(None)
    }

    async fn remove_notification(
        &self,
        obj: &mut CloudStorageSource,
        pass: &mut Pass<'_, CloudStorageSource>,
        project: &str,
    ) -> ReconcileResult<Option<Action>> {
        let topic = obj
            .status
            .as_ref()
            .and_then(|s| s.topic.clone())
            .unwrap_or_default();
        let args = Self::operation_args(obj, OperationAction::Delete, project, &topic)?;
        let handle = self.operations.submit(&OperationOwner::of(obj), &args).await?;

        match self.operations.poll(&handle).await? {
            OperationState::Running => {
                CONDITIONS.mark_unknown(
                    &mut obj.status_mut().source.conditions,
                    NOTIFICATION_READY,
                    "NotificationDeleting",
                    format!("waiting for {}", handle.name),
                );
                Ok(Some(Action::requeue(self.in_progress_requeue)))
            }
            OperationState::Succeeded(_) => {
                info!("Notification removed");
                obj.status_mut().notification_id = None;
                pass.persist_status(obj).await?;
                self.operations.forget(&handle).await?;
                Ok(None)
            }
            OperationState::Failed(result) => {
                let message = failure_message(result.as_ref().map(|r| r.error.as_str()), &handle);
                Self::mark_false(obj, NOTIFICATION_READY, "NotificationDeleteFailed", &message);
                self.operations.forget(&handle).await?;
                Err(ReconcileError::Transient(message))
            }
        }
    }

    async fn remove_subscription(&self, obj: &CloudStorageSource) -> ReconcileResult<()> {
        let key = ObjectKey::from_resource(obj);
        let uid = obj.uid().unwrap_or_default();
        match self.subscriptions.get(&key).await {
            Ok(existing) if is_controlled_by(&existing, &uid) => {
                if existing.meta().deletion_timestamp.is_none() {
                    info!(subscription = %key, "Deleting owned PullSubscription");
                    match self.subscriptions.delete(&key).await {
                        Ok(()) | Err(StoreError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn failure_message(error: Option<&str>, handle: &OperationHandle) -> String {
    match error.filter(|e| !e.is_empty()) {
        Some(error) => error.to_string(),
        None => format!("{} failed without a result", handle.name),
    }
}

#[async_trait]
impl ReconcileStrategy<CloudStorageSource> for StorageStrategy {
    fn finalizer(&self) -> &str {
        &self.finalizer
    }

    fn conditions(&self) -> ConditionSet {
        CONDITIONS
    }

    async fn prepare(&self, obj: &mut CloudStorageSource) -> ReconcileResult<()> {
        let recorded = obj.status.as_ref().and_then(|s| s.source.project_id.clone());
        match resolve_project(obj.spec.project.as_deref(), recorded.as_deref(), self.projects.as_ref())
            .await
        {
            Ok(project) => obj.status_mut().source.project_id = Some(project),
            Err(e) => {
                Self::mark_false(obj, TOPIC_READY, "ProjectNotResolved", &e.to_string());
                return Err(e);
            }
        }

        if let Err(message) = storage_event_types(&obj.spec.event_types) {
            Self::mark_false(obj, NOTIFICATION_READY, "InvalidEventTypes", &message);
            return Err(ReconcileError::Permanent(message));
        }
        Ok(())
    }

    async fn converge(
        &self,
        obj: &mut CloudStorageSource,
        pass: &mut Pass<'_, CloudStorageSource>,
    ) -> ReconcileResult<Action> {
        let project = Self::project(obj)?;
        if let Some(topic) = Self::requested_topic(obj) {
            Self::validate_topic(obj, &topic)?;
        }
        if let Some(action) = self.retire_stale_topic(obj, pass, &project).await? {
            return Ok(action);
        }
        let topic = self.ensure_topic(obj, pass, &project).await?;
        self.ensure_subscription(obj, &project, &topic).await?;
        self.ensure_notification(obj, &project, &topic).await
    }

    async fn cleanup(
        &self,
        obj: &mut CloudStorageSource,
        pass: &mut Pass<'_, CloudStorageSource>,
    ) -> ReconcileResult<Cleanup> {
        // A create still in flight would leave a notification nobody deletes
        if let Some(action) = self.settle_create(obj).await? {
            return Ok(Cleanup::Pending(action));
        }

        let has_topic = obj
            .status
            .as_ref()
            .and_then(|s| s.topic.as_deref())
            .is_some_and(|t| !t.is_empty());
        if Self::has_notification(obj) || has_topic {
            let recorded = obj.status.as_ref().and_then(|s| s.source.project_id.clone());
            let project = resolve_project(
                obj.spec.project.as_deref(),
                recorded.as_deref(),
                self.projects.as_ref(),
            )
            .await?;

            if Self::has_notification(obj) {
                if let Some(action) = self.remove_notification(obj, pass, &project).await? {
                    return Ok(Cleanup::Pending(action));
                }
            }
            self.release_topic(obj, &project).await?;
        }

        self.remove_subscription(obj).await?;
        Ok(Cleanup::Finished)
    }
}
