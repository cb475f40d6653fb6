//! # Reconcile Scenarios
//!
//! End-to-end passes of the CloudStorageSource and PullSubscription
//! reconcilers against in-memory stores and providers.

mod common;

use cloud_source_controller::controller::conditions::{READY, SINK_RESOLVED};
use cloud_source_controller::controller::error::ReconcileError;
use cloud_source_controller::controller::kinds::finalizer_name;
use cloud_source_controller::controller::kinds::pull_subscription::{DEPLOYED, SUBSCRIBED};
use cloud_source_controller::controller::kinds::storage::{
    NOTIFICATION_READY, PULL_SUBSCRIPTION_READY, TOPIC_READY,
};
use cloud_source_controller::controller::operation::{
    LocalRunner, OperationAction, OperationOwner, OperationResult, OperationRunner, OperationState,
};
use cloud_source_controller::controller::queue::WorkQueue;
use cloud_source_controller::controller::reconciler::ManagedResource;
use cloud_source_controller::controller::sink::SinkError;
use cloud_source_controller::crd::{CloudStorageSource, ConditionStatus};
use cloud_source_controller::provider::{NotificationSpec, ProviderError};
use cloud_source_controller::runtime::process_next;
use cloud_source_controller::testing::{FakeProvider, ScriptedRunner};
use common::*;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

fn has_finalizer(source: &CloudStorageSource) -> bool {
    source
        .finalizers()
        .iter()
        .any(|f| *f == finalizer_name::<CloudStorageSource>())
}

/// A record created with an empty topic gets a generated one, and a second
/// pass reuses it without creating anything
#[tokio::test]
async fn test_generated_topic_is_created_once() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    let topic = source.status.as_ref().and_then(|s| s.topic.clone()).unwrap();
    assert!(topic.starts_with("gcs-"), "unexpected topic {topic}");
    assert!(harness.topics.contains(&topic));
    assert_eq!(condition(&source, TOPIC_READY), ConditionStatus::True);
    assert!(has_finalizer(&source));
    assert_eq!(harness.topics.create_calls(), 1);

    harness.reconcile(&key).await.unwrap();

    let again = harness.current(&key);
    assert_eq!(harness.topics.create_calls(), 1);
    assert_eq!(again.status.as_ref().and_then(|s| s.topic.clone()), Some(topic));
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();
    let first = harness.current(&key);
    let writes = harness.store.write_count();
    let events = harness.events.events().len();

    harness.reconcile(&key).await.unwrap();

    let second = harness.current(&key);
    assert_eq!(harness.store.write_count(), writes);
    assert_eq!(first.status, second.status);
    assert_eq!(first.finalizers(), second.finalizers());
    assert_eq!(harness.events.events().len(), events);
    assert_eq!(harness.notifications.create_calls(), 1);
    assert_eq!(harness.notifications.ids().len(), 1);
}

#[tokio::test]
async fn test_full_convergence_reaches_ready() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();
    let source = harness.current(&key);
    assert_eq!(
        condition(&source, PULL_SUBSCRIPTION_READY),
        ConditionStatus::Unknown
    );
    assert_eq!(condition(&source, READY), ConditionStatus::Unknown);

    harness.mark_subscription_ready(&key).await;
    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    let status = source.status.clone().unwrap();
    assert_eq!(condition(&source, SINK_RESOLVED), ConditionStatus::True);
    assert_eq!(condition(&source, TOPIC_READY), ConditionStatus::True);
    assert_eq!(condition(&source, PULL_SUBSCRIPTION_READY), ConditionStatus::True);
    assert_eq!(condition(&source, NOTIFICATION_READY), ConditionStatus::True);
    assert_eq!(condition(&source, READY), ConditionStatus::True);
    assert_eq!(status.source.sink_uri.as_deref(), Some(SINK_URI));
    assert_eq!(status.source.project_id.as_deref(), Some(PROJECT));
    assert_eq!(status.source.observed_generation, Some(1));
    assert!(status.notification_id.is_some());
    assert!(harness.events.reasons().contains(&"Updated".to_string()));
}

#[tokio::test]
async fn test_owned_subscription_mirrors_source() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    let subscription = harness.subscriptions.current(&key).unwrap();
    let topic = source.status.as_ref().and_then(|s| s.topic.clone()).unwrap();
    assert_eq!(subscription.spec.topic, topic);
    assert_eq!(subscription.spec.project.as_deref(), Some(PROJECT));
    assert_eq!(subscription.spec.sink, source.spec.sink);
    let owner = &subscription.owner_references()[0];
    assert_eq!(owner.controller, Some(true));
    assert_eq!(Some(owner.uid.clone()), source.uid());
}

#[tokio::test]
async fn test_foreign_subscription_is_not_adopted() {
    let harness = StorageHarness::new();
    harness.subscriptions.insert(pull_subscription("uploads", "elsewhere"));
    let key = harness.seed(storage_source("uploads", "b"));

    let err = harness.reconcile(&key).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Permanent(_)));
    let source = harness.current(&key);
    assert_eq!(condition(&source, PULL_SUBSCRIPTION_READY), ConditionStatus::False);
    assert_eq!(reason(&source, PULL_SUBSCRIPTION_READY).as_deref(), Some("NotOwned"));
    assert_eq!(
        harness.subscriptions.current(&key).unwrap().spec.topic,
        "elsewhere"
    );
    assert!(harness.events.reasons().contains(&"InternalError".to_string()));
}

/// Deletion with a recorded notification that the provider already lost
#[tokio::test]
async fn test_deletion_treats_missing_notification_as_removed() {
    let harness = StorageHarness::new();
    let mut source = storage_source("uploads", "b");
    source.metadata.finalizers = Some(vec![finalizer_name::<CloudStorageSource>()]);
    source.status_mut().notification_id = Some("42".to_string());
    source.status_mut().source.project_id = Some(PROJECT.to_string());
    let key = harness.seed(source);
    harness.notifications.insert("42");
    harness
        .notifications
        .fail_next_delete(ProviderError::NotFound("42".into()));
    harness.store.mark_deleting(&key);

    harness.reconcile(&key).await.unwrap();

    assert_eq!(harness.notifications.deleted(), vec!["42".to_string()]);
    assert!(!harness.notifications.contains("42"));
    assert!(!harness.store.contains(&key));
}

#[tokio::test]
async fn test_unresolvable_sink_stops_before_finalizer() {
    let harness = StorageHarness::new();
    harness
        .sinks
        .set(Err(SinkError::NotFound("Service default/event-display".into())));
    let key = harness.seed(storage_source("uploads", "b"));
    let queue = WorkQueue::new("scenario", Duration::from_secs(1), Duration::from_secs(8));
    queue.add(key.clone()).await;

    assert!(process_next(&queue, &harness.reconciler).await);

    let source = harness.current(&key);
    assert_eq!(condition(&source, SINK_RESOLVED), ConditionStatus::False);
    assert_eq!(reason(&source, SINK_RESOLVED).as_deref(), Some("NotFound"));
    assert_eq!(source.status.as_ref().and_then(|s| s.source.sink_uri.clone()), None);
    assert!(!has_finalizer(&source));
    assert_eq!(queue.num_requeues(&key).await, 1);
    assert_eq!(harness.topics.create_calls(), 0);

    let err = harness.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unresolved(_)));
}

/// A concurrent status write lands between our read and our write
#[tokio::test]
async fn test_conflicting_write_is_retried_on_fresh_state() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));
    harness.store.inject_before_next_write(|stored: &mut CloudStorageSource| {
        stored.status_mut().source.conditions.set(
            "Audited",
            ConditionStatus::True,
            Some("Reviewed".into()),
            None,
        );
    });

    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    assert_eq!(condition(&source, "Audited"), ConditionStatus::True);
    assert_eq!(condition(&source, TOPIC_READY), ConditionStatus::True);
    assert!(has_finalizer(&source));
    assert_eq!(harness.topics.create_calls(), 1);
}

#[tokio::test]
async fn test_invalid_event_type_is_permanent() {
    let harness = StorageHarness::new();
    let mut source = storage_source("uploads", "b");
    source.spec.event_types = vec!["rename".to_string()];
    let key = harness.seed(source);

    let err = harness.reconcile(&key).await.unwrap_err();

    assert_eq!(err.class(), "permanent");
    let source = harness.current(&key);
    assert_eq!(reason(&source, NOTIFICATION_READY).as_deref(), Some("InvalidEventTypes"));
    assert_eq!(harness.topics.create_calls(), 0);
}

#[tokio::test]
async fn test_invalid_topic_name_is_permanent() {
    let harness = StorageHarness::new();
    let mut source = storage_source("uploads", "b");
    source.spec.topic = Some("9 lives".to_string());
    let key = harness.seed(source);

    let err = harness.reconcile(&key).await.unwrap_err();

    assert_eq!(err.class(), "permanent");
    let source = harness.current(&key);
    assert_eq!(reason(&source, TOPIC_READY).as_deref(), Some("InvalidTopicName"));
    assert_eq!(harness.topics.create_calls(), 0);
}

#[tokio::test]
async fn test_topic_name_survives_failed_create() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));
    harness
        .topics
        .fail_next_create(ProviderError::Transient("quota".into()));

    let err = harness.reconcile(&key).await.unwrap_err();
    assert_eq!(err.class(), "transient");
    let source = harness.current(&key);
    let topic = source.status.as_ref().and_then(|s| s.topic.clone()).unwrap();
    assert_eq!(reason(&source, TOPIC_READY).as_deref(), Some("TopicFailed"));

    harness.reconcile(&key).await.unwrap();
    assert_eq!(harness.topics.ids(), vec![topic]);
}

/// Crash after the topic exists but the notification never came up: deleting
/// the record still removes every external resource
#[tokio::test]
async fn test_deletion_after_partial_convergence_leaves_nothing() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.push(
        OperationAction::Create,
        OperationState::Failed(Some(OperationResult::failure("bucket missing", PROJECT))),
    );
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));

    let err = harness.reconcile(&key).await.unwrap_err();
    assert_eq!(err.class(), "permanent");
    assert_eq!(harness.topics.ids().len(), 1);
    assert!(harness.subscriptions.contains(&key));
    assert_eq!(runner.forgotten().len(), 1);

    harness.store.mark_deleting(&key);
    harness.reconcile(&key).await.unwrap();

    assert!(harness.topics.ids().is_empty());
    assert!(!harness.subscriptions.contains(&key));
    assert!(!harness.store.contains(&key));
}

#[tokio::test]
async fn test_finalizer_held_while_notification_delete_runs() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.push(
        OperationAction::Create,
        OperationState::Succeeded(OperationResult::success("n-1", PROJECT)),
    );
    runner.push(OperationAction::Delete, OperationState::Running);
    runner.push(
        OperationAction::Delete,
        OperationState::Succeeded(OperationResult::success("n-1", PROJECT)),
    );
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));
    harness.reconcile(&key).await.unwrap();
    harness.store.mark_deleting(&key);

    let action = harness.reconcile(&key).await.unwrap();

    assert_eq!(action.requeue_after, Some(IN_PROGRESS_REQUEUE));
    let source = harness.current(&key);
    assert!(has_finalizer(&source));
    assert_eq!(reason(&source, NOTIFICATION_READY).as_deref(), Some("NotificationDeleting"));
    assert_eq!(harness.topics.ids().len(), 1);

    harness.reconcile(&key).await.unwrap();

    assert!(!harness.store.contains(&key));
    assert!(harness.topics.ids().is_empty());
    let deletes: Vec<_> = runner
        .submitted()
        .into_iter()
        .filter(|args| args.action == OperationAction::Delete)
        .collect();
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes[0].notification_id.as_deref(), Some("n-1"));
}

#[tokio::test]
async fn test_running_notification_job_requeues() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.push(OperationAction::Create, OperationState::Running);
    runner.push(
        OperationAction::Create,
        OperationState::Succeeded(OperationResult::success("n-7", PROJECT)),
    );
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));

    let action = harness.reconcile(&key).await.unwrap();

    assert_eq!(action.requeue_after, Some(IN_PROGRESS_REQUEUE));
    let source = harness.current(&key);
    assert_eq!(condition(&source, NOTIFICATION_READY), ConditionStatus::Unknown);
    assert_eq!(reason(&source, NOTIFICATION_READY).as_deref(), Some("NotificationPending"));

    let action = harness.reconcile(&key).await.unwrap();

    assert_eq!(action.requeue_after, None);
    let source = harness.current(&key);
    assert_eq!(condition(&source, NOTIFICATION_READY), ConditionStatus::True);
    assert_eq!(
        source.status.as_ref().and_then(|s| s.notification_id.as_deref()),
        Some("n-7")
    );
    let create = &runner.submitted()[0];
    assert_eq!(create.event_types, vec!["OBJECT_FINALIZE", "OBJECT_DELETE"]);
    assert_eq!(create.custom_attributes["ce-type"], "google.gcs");
    let forgotten = runner.forgotten();
    assert_eq!(forgotten.len(), 1);
    assert_eq!(forgotten[0].action, OperationAction::Create);
}

/// A finished create is discarded once its id is recorded; later passes
/// submit a fresh create carrying that id, so a lost notification is noticed
#[tokio::test]
async fn test_recorded_notification_is_rechecked_each_pass() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.push(
        OperationAction::Create,
        OperationState::Succeeded(OperationResult::success("n-1", PROJECT)),
    );
    runner.push(OperationAction::Create, OperationState::Running);
    runner.push(
        OperationAction::Create,
        OperationState::Succeeded(OperationResult::success("n-2", PROJECT)),
    );
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();
    assert_eq!(runner.forgotten().len(), 1);

    let action = harness.reconcile(&key).await.unwrap();

    assert_eq!(action.requeue_after, Some(IN_PROGRESS_REQUEUE));
    let source = harness.current(&key);
    assert_eq!(condition(&source, NOTIFICATION_READY), ConditionStatus::True);
    let submitted = runner.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].notification_id, None);
    assert_eq!(submitted[1].notification_id.as_deref(), Some("n-1"));

    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    assert_eq!(
        source.status.as_ref().and_then(|s| s.notification_id.as_deref()),
        Some("n-2")
    );
    assert_eq!(runner.forgotten().len(), 2);
}

#[tokio::test]
async fn test_in_process_runner_keeps_no_finished_results() {
    let notifications = Arc::new(FakeProvider::<NotificationSpec>::named("notification"));
    let runner = Arc::new(LocalRunner::new(notifications.clone()));
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));

    harness.reconcile(&key).await.unwrap();
    harness.reconcile(&key).await.unwrap();

    let owner = OperationOwner::of(&harness.current(&key));
    assert_eq!(runner.find(&owner, OperationAction::Create).await.unwrap(), None);
    assert_eq!(notifications.ids().len(), 1);
    assert_eq!(notifications.create_calls(), 1);
}

/// Deleted while the create operation is still running: cleanup waits for it
/// and then removes the notification it made
#[tokio::test]
async fn test_deletion_waits_for_running_notification_create() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.push(OperationAction::Create, OperationState::Running);
    let harness = StorageHarness::with_runner(runner.clone());
    let key = harness.seed(storage_source("uploads", "b"));
    harness.reconcile(&key).await.unwrap();
    harness.store.mark_deleting(&key);

    let action = harness.reconcile(&key).await.unwrap();

    assert_eq!(action.requeue_after, Some(IN_PROGRESS_REQUEUE));
    let source = harness.current(&key);
    assert!(has_finalizer(&source));
    assert_eq!(reason(&source, NOTIFICATION_READY).as_deref(), Some("NotificationPending"));
    assert_eq!(harness.topics.ids().len(), 1);
    assert_eq!(runner.submitted().len(), 1);
    assert!(runner.forgotten().is_empty());

    runner.push(
        OperationAction::Create,
        OperationState::Succeeded(OperationResult::success("n-9", PROJECT)),
    );
    runner.push(
        OperationAction::Delete,
        OperationState::Succeeded(OperationResult::success("n-9", PROJECT)),
    );
    harness.reconcile(&key).await.unwrap();

    assert!(!harness.store.contains(&key));
    assert!(harness.topics.ids().is_empty());
    let deletes: Vec<_> = runner
        .submitted()
        .into_iter()
        .filter(|args| args.action == OperationAction::Delete)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].notification_id.as_deref(), Some("n-9"));
}

/// Pointing spec at another topic retires the generated one along with the
/// notification publishing to it
#[tokio::test]
async fn test_topic_change_releases_generated_topic() {
    let harness = StorageHarness::new();
    let key = harness.seed(storage_source("uploads", "b"));
    harness.reconcile(&key).await.unwrap();
    let status = harness.current(&key).status.unwrap();
    let generated = status.topic.unwrap();
    let first_notification = status.notification_id.unwrap();

    harness
        .edit_spec(&key, |spec| spec.topic = Some("user-topic".to_string()))
        .await;
    harness.reconcile(&key).await.unwrap();

    assert!(!harness.topics.contains(&generated));
    assert!(harness.topics.contains("user-topic"));
    assert!(!harness.notifications.contains(&first_notification));
    assert_eq!(harness.notifications.ids().len(), 1);
    let source = harness.current(&key);
    let status = source.status.clone().unwrap();
    assert_eq!(status.topic.as_deref(), Some("user-topic"));
    assert!(status.topic_owned);
    assert_eq!(condition(&source, TOPIC_READY), ConditionStatus::True);
    assert_eq!(
        harness.subscriptions.current(&key).unwrap().spec.topic,
        "user-topic"
    );

    harness.store.mark_deleting(&key);
    harness.reconcile(&key).await.unwrap();

    assert!(!harness.store.contains(&key));
    assert!(harness.topics.ids().is_empty());
    assert!(harness.notifications.ids().is_empty());
}

/// A topic that existed before the source named it is used, never deleted
#[tokio::test]
async fn test_preexisting_topic_survives_deletion() {
    let harness = StorageHarness::new();
    harness.topics.insert("shared-topic");
    let mut source = storage_source("uploads", "b");
    source.spec.topic = Some("shared-topic".to_string());
    let key = harness.seed(source);

    harness.reconcile(&key).await.unwrap();

    let status = harness.current(&key).status.unwrap();
    assert_eq!(status.topic.as_deref(), Some("shared-topic"));
    assert!(!status.topic_owned);
    assert_eq!(harness.topics.create_calls(), 0);

    harness.store.mark_deleting(&key);
    harness.reconcile(&key).await.unwrap();

    assert!(!harness.store.contains(&key));
    assert_eq!(harness.topics.ids(), vec!["shared-topic".to_string()]);
    assert_eq!(harness.topics.delete_calls(), 0);
    assert!(harness.notifications.ids().is_empty());
}

/// Someone else created the named topic between our existence check and our
/// create
#[tokio::test]
async fn test_topic_lost_to_concurrent_create_is_not_owned() {
    let harness = StorageHarness::new();
    harness
        .topics
        .fail_next_create(ProviderError::AlreadyExists("shared-topic".into()));
    let mut source = storage_source("uploads", "b");
    source.spec.topic = Some("shared-topic".to_string());
    let key = harness.seed(source);

    harness.reconcile(&key).await.unwrap();

    let source = harness.current(&key);
    assert_eq!(condition(&source, TOPIC_READY), ConditionStatus::True);
    assert!(!source.status.unwrap().topic_owned);

    harness.store.mark_deleting(&key);
    harness.reconcile(&key).await.unwrap();

    assert!(!harness.store.contains(&key));
    assert_eq!(harness.topics.delete_calls(), 0);
}

#[tokio::test]
async fn test_missing_record_is_a_no_op() {
    let harness = StorageHarness::new();
    let action = harness.reconcile(&key("gone")).await.unwrap();
    assert_eq!(action.requeue_after, None);
    assert_eq!(harness.store.write_count(), 0);
}

#[tokio::test]
async fn test_pull_subscription_converges() {
    let harness = PullSubscriptionHarness::new(true);
    let key = harness.seed(pull_subscription("orders", "orders-topic"));

    harness.reconcile(&key).await.unwrap();

    let ps = harness.current(&key);
    let status = ps.status.clone().unwrap();
    let name = status.subscription_id.clone().unwrap();
    assert_eq!(name, format!("cre-pull-{}", ps.uid().unwrap()));
    assert!(harness.subscriptions.contains(&name));
    assert_eq!(condition(&ps, SUBSCRIBED), ConditionStatus::True);
    assert_eq!(condition(&ps, DEPLOYED), ConditionStatus::True);
    assert_eq!(condition(&ps, READY), ConditionStatus::True);

    let applied = harness.data_plane.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].subscription, name);
    assert_eq!(applied[0].sink_uri, SINK_URI);
    assert_eq!(applied[0].project, PROJECT);
}

#[tokio::test]
async fn test_pull_subscription_waits_for_adapter() {
    let harness = PullSubscriptionHarness::new(false);
    let key = harness.seed(pull_subscription("orders", "orders-topic"));

    harness.reconcile(&key).await.unwrap();
    let ps = harness.current(&key);
    assert_eq!(condition(&ps, DEPLOYED), ConditionStatus::Unknown);
    assert_eq!(reason(&ps, DEPLOYED).as_deref(), Some("DeploymentNotReady"));
    assert_eq!(condition(&ps, READY), ConditionStatus::Unknown);

    harness.data_plane.set_ready(true);
    harness.reconcile(&key).await.unwrap();
    assert_eq!(condition(&harness.current(&key), READY), ConditionStatus::True);
    assert_eq!(harness.subscriptions.create_calls(), 1);
}

#[tokio::test]
async fn test_pull_subscription_transformer_failure() {
    let harness = PullSubscriptionHarness::new(true);
    let mut ps = pull_subscription("orders", "orders-topic");
    ps.spec.transformer = Some(sink_ref("missing-transformer"));
    harness
        .sinks
        .set(Err(SinkError::NotFound("Service default/missing-transformer".into())));
    let key = harness.seed(ps);

    let err = harness.reconcile(&key).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Unresolved(_)));
    let ps = harness.current(&key);
    assert_eq!(condition(&ps, SINK_RESOLVED), ConditionStatus::False);
    assert!(ps.finalizers().is_empty());
    assert!(harness.subscriptions.ids().is_empty());
}

#[tokio::test]
async fn test_pull_subscription_deletion_removes_subscription() {
    let harness = PullSubscriptionHarness::new(true);
    let key = harness.seed(pull_subscription("orders", "orders-topic"));
    harness.reconcile(&key).await.unwrap();
    assert_eq!(harness.subscriptions.ids().len(), 1);

    harness.store.mark_deleting(&key);
    harness.reconcile(&key).await.unwrap();

    assert!(harness.subscriptions.ids().is_empty());
    assert!(!harness.store.contains(&key));
}
