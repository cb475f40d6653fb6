//! # CRD Validation Tests
//!
//! Sample manifests for every served kind, deserialized against the Rust
//! types to catch schema drift early.

use cloud_source_controller::crd::{
    CloudStorageSource, ConditionStatus, PullSubscription, ScaledObject,
};
use kube::CustomResourceExt;

/// CloudStorageSource with every field set
#[test]
fn test_storage_source_all_fields() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: CloudStorageSource
metadata:
  name: uploads
  namespace: default
spec:
  bucket: my-uploads
  project: my-gcp-project
  topic: uploads-topic
  eventTypes: [finalize, archive, delete, metadataUpdate]
  objectNamePrefix: incoming/
  customAttributes:
    team: media
  sink:
    ref:
      apiVersion: serving.knative.dev/v1
      kind: Service
      name: event-display
      namespace: events
  secret:
    name: google-cloud-key
"#;

    let source: CloudStorageSource =
        serde_yaml::from_str(yaml).expect("Should deserialize a full CloudStorageSource");

    assert_eq!(source.spec.bucket, "my-uploads");
    assert_eq!(source.spec.project.as_deref(), Some("my-gcp-project"));
    assert_eq!(source.spec.topic.as_deref(), Some("uploads-topic"));
    assert_eq!(source.spec.event_types.len(), 4);
    assert_eq!(source.spec.object_name_prefix.as_deref(), Some("incoming/"));
    assert_eq!(source.spec.custom_attributes["team"], "media");

    let reference = source.spec.sink.reference.as_ref().unwrap();
    assert_eq!(reference.kind, "Service");
    assert_eq!(reference.namespace.as_deref(), Some("events"));
    assert!(source.spec.sink.uri.is_none());

    // Key defaults when omitted
    let secret = source.spec.secret.as_ref().unwrap();
    assert_eq!(secret.name, "google-cloud-key");
    assert_eq!(secret.key, "key.json");
}

#[test]
fn test_storage_source_minimal() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: CloudStorageSource
metadata:
  name: uploads
spec:
  bucket: my-uploads
  sink:
    uri: https://example.com/events
"#;

    let source: CloudStorageSource =
        serde_yaml::from_str(yaml).expect("Should deserialize a minimal CloudStorageSource");

    assert!(source.spec.project.is_none());
    assert!(source.spec.topic.is_none());
    assert!(source.spec.event_types.is_empty());
    assert!(source.spec.custom_attributes.is_empty());
    assert!(source.spec.sink.reference.is_none());
    assert_eq!(source.spec.sink.uri.as_deref(), Some("https://example.com/events"));
    assert!(source.status.is_none());
}

#[test]
fn test_storage_source_requires_bucket() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: CloudStorageSource
metadata:
  name: uploads
spec:
  sink:
    uri: https://example.com/events
"#;

    assert!(serde_yaml::from_str::<CloudStorageSource>(yaml).is_err());
}

/// Status as written by the controller, conditions included
#[test]
fn test_storage_source_status() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: CloudStorageSource
metadata:
  name: uploads
spec:
  bucket: my-uploads
  sink:
    uri: https://example.com/events
status:
  observedGeneration: 3
  sinkUri: https://example.com/events
  projectId: my-gcp-project
  topic: gcs-0f8e2a94-7c1d-4c1c-9b8e-3a2f1d0e9c7b
  topicOwned: true
  notificationId: "17"
  conditions:
    - type: Ready
      status: "True"
      lastTransitionTime: "2024-05-01T10:00:00Z"
    - type: NotificationReady
      status: "False"
      reason: NotificationFailed
      message: bucket not found
"#;

    let source: CloudStorageSource =
        serde_yaml::from_str(yaml).expect("Should deserialize status");
    let status = source.status.unwrap();

    assert_eq!(status.source.observed_generation, Some(3));
    assert_eq!(status.source.project_id.as_deref(), Some("my-gcp-project"));
    assert_eq!(status.notification_id.as_deref(), Some("17"));
    assert!(status.topic_owned);
    assert_eq!(status.source.conditions.len(), 2);
    assert_eq!(status.source.conditions.status_of("Ready"), ConditionStatus::True);
    let failed = status.source.conditions.get("NotificationReady").unwrap();
    assert_eq!(failed.status, ConditionStatus::False);
    assert_eq!(failed.reason.as_deref(), Some("NotificationFailed"));
    assert_eq!(
        status.source.conditions.status_of("TopicReady"),
        ConditionStatus::Unknown
    );
}

#[test]
fn test_pull_subscription_all_fields() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: PullSubscription
metadata:
  name: orders
  namespace: default
  annotations:
    autoscaling.knative.dev/class: keda.autoscaling.knative.dev
spec:
  topic: orders-topic
  project: my-gcp-project
  sink:
    ref:
      apiVersion: v1
      kind: Service
      name: event-display
  transformer:
    uri: http://transformer.default.svc.cluster.local/
  ackDeadlineSeconds: 30
  retainAckedMessages: true
  retentionDuration: 604800s
"#;

    let subscription: PullSubscription =
        serde_yaml::from_str(yaml).expect("Should deserialize a full PullSubscription");

    assert_eq!(subscription.spec.topic, "orders-topic");
    assert_eq!(subscription.spec.ack_deadline_seconds, Some(30));
    assert!(subscription.spec.retain_acked_messages);
    assert_eq!(subscription.spec.retention_duration.as_deref(), Some("604800s"));
    assert_eq!(
        subscription.spec.transformer.as_ref().and_then(|t| t.uri.as_deref()),
        Some("http://transformer.default.svc.cluster.local/")
    );
}

#[test]
fn test_pull_subscription_defaults() {
    let yaml = r#"
apiVersion: sources.cloud-events.dev/v1alpha1
kind: PullSubscription
metadata:
  name: orders
spec:
  topic: orders-topic
  sink:
    uri: https://example.com/events
status:
  subscriptionId: cre-pull-7d3c
"#;

    let subscription: PullSubscription =
        serde_yaml::from_str(yaml).expect("Should deserialize a minimal PullSubscription");

    assert!(subscription.spec.project.is_none());
    assert!(subscription.spec.transformer.is_none());
    assert!(subscription.spec.ack_deadline_seconds.is_none());
    assert!(!subscription.spec.retain_acked_messages);
    let status = subscription.status.unwrap();
    assert_eq!(status.subscription_id.as_deref(), Some("cre-pull-7d3c"));
    assert!(status.source.conditions.is_empty());
}

#[test]
fn test_scaled_object() {
    let yaml = r#"
apiVersion: keda.sh/v1alpha1
kind: ScaledObject
metadata:
  name: orders-adapter
spec:
  scaleTargetRef:
    name: orders-adapter
  minReplicaCount: 0
  maxReplicaCount: 5
  pollingInterval: 15
  cooldownPeriod: 120
  triggers:
    - type: gcp-pubsub
      metadata:
        subscriptionName: cre-pull-7d3c
        subscriptionSize: "5"
"#;

    let scaled: ScaledObject =
        serde_yaml::from_str(yaml).expect("Should deserialize a ScaledObject");

    assert_eq!(scaled.spec.scale_target_ref.name, "orders-adapter");
    assert_eq!(scaled.spec.min_replica_count, Some(0));
    assert_eq!(scaled.spec.triggers.len(), 1);
    assert_eq!(
        scaled.spec.triggers[0].metadata["subscriptionName"],
        "cre-pull-7d3c"
    );
}

/// Generated CRDs carry the group, short names and a status subresource
#[test]
fn test_generated_crds() {
    let storage = CloudStorageSource::crd();
    assert_eq!(
        storage.metadata.name.as_deref(),
        Some("cloudstoragesources.sources.cloud-events.dev")
    );
    assert_eq!(storage.spec.names.short_names, Some(vec!["css".to_string()]));
    let version = &storage.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());

    let subscription = PullSubscription::crd();
    assert_eq!(subscription.spec.group, "sources.cloud-events.dev");
    assert_eq!(subscription.spec.names.short_names, Some(vec!["ps".to_string()]));
    assert_eq!(subscription.spec.scope, "Namespaced");
}
