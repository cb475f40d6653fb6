use super::{Destination, SecretKeyRef, SourceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CloudStorageSource Custom Resource Definition
///
/// Publishes object change notifications of a Cloud Storage bucket to a sink,
/// through a Pub/Sub topic and a PullSubscription owned by the source.
///
/// # Example
///
/// ```yaml
/// apiVersion: sources.cloud-events.dev/v1alpha1
/// kind: CloudStorageSource
/// metadata:
///   name: uploads
///   namespace: default
/// spec:
///   bucket: my-uploads
///   eventTypes: [finalize, delete]
///   sink:
///     ref:
///       apiVersion: v1
///       kind: Service
///       name: event-display
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "CloudStorageSource",
    group = "sources.cloud-events.dev",
    version = "v1alpha1",
    namespaced,
    status = "CloudStorageSourceStatus",
    shortname = "css",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".status.topic"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageSourceSpec {
    /// Bucket to watch
    pub bucket: String,
    /// GCP project owning the topic. Resolved from the metadata server when empty.
    #[serde(default)]
    pub project: Option<String>,
    /// Topic name. Generated when empty.
    #[serde(default)]
    pub topic: Option<String>,
    /// Subset of `finalize`, `archive`, `delete`, `metadataUpdate`
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub object_name_prefix: Option<String>,
    /// Extra attributes attached to every notification
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
    /// Where events are delivered
    pub sink: Destination,
    /// Credentials mounted into notification operation jobs
    #[serde(default)]
    pub secret: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageSourceStatus {
    #[serde(flatten)]
    pub source: SourceStatus,
    /// Topic notifications are published to
    #[serde(default)]
    pub topic: Option<String>,
    /// Whether this source created the topic and deletes it on cleanup.
    /// Pre-existing topics named in spec are used but never deleted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub topic_owned: bool,
    /// Identifier Cloud Storage assigned to the notification
    #[serde(default)]
    pub notification_id: Option<String>,
}
