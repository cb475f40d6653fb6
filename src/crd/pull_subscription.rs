use super::{Destination, SourceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PullSubscription Custom Resource Definition
///
/// Pulls messages from a Pub/Sub topic through a receive adapter and delivers
/// them to a sink. The autoscaling class annotation selects between a plain
/// Deployment and a KEDA-scaled one.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PullSubscription",
    group = "sources.cloud-events.dev",
    version = "v1alpha1",
    namespaced,
    status = "PullSubscriptionStatus",
    shortname = "ps",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Subscription", "type":"string", "jsonPath":".status.subscriptionId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PullSubscriptionSpec {
    /// Topic to subscribe to
    pub topic: String,
    #[serde(default)]
    pub project: Option<String>,
    pub sink: Destination,
    /// Optional hop events pass through before the sink
    #[serde(default)]
    pub transformer: Option<Destination>,
    /// Ack deadline in seconds
    #[serde(default)]
    pub ack_deadline_seconds: Option<i32>,
    #[serde(default)]
    pub retain_acked_messages: bool,
    /// Message retention, e.g. `604800s`
    #[serde(default)]
    pub retention_duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullSubscriptionStatus {
    #[serde(flatten)]
    pub source: SourceStatus,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub transformer_uri: Option<String>,
}
