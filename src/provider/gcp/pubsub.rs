//! Pub/Sub topics and subscriptions over the REST API v1.
//!
//! Both resources are named by the caller, so an AlreadyExists on create
//! resolves to the requested name.

use super::rest::{encode_segment, GcpRestClient};
use crate::provider::{
    ExternalResourceProvider, ProviderError, ProviderResult, SubscriptionSpec, TopicSpec,
};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::{info_span, Instrument};

const SERVICE: &str = "pubsub";

/// Map a NotFound on GET to `false`
fn exists_from(result: ProviderResult<Option<serde_json::Value>>) -> ProviderResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(ProviderError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Fully qualified topic name as Pub/Sub spells it
pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

#[derive(Debug, Clone)]
pub struct PubSubTopics {
    client: Arc<GcpRestClient>,
    endpoint: String,
}

impl PubSubTopics {
    pub fn new(client: Arc<GcpRestClient>, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, spec: &TopicSpec, name: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}",
            self.endpoint,
            encode_segment(&spec.project),
            encode_segment(name)
        )
    }
}

#[async_trait]
impl ExternalResourceProvider for PubSubTopics {
    type Spec = TopicSpec;

    fn kind(&self) -> &'static str {
        "topic"
    }

    fn requested_id<'a>(&self, spec: &'a TopicSpec) -> Option<&'a str> {
        Some(&spec.name)
    }

    async fn exists(&self, spec: &TopicSpec, id: &str) -> ProviderResult<bool> {
        let url = self.url(spec, id);
        exists_from(
            self.client
                .call(SERVICE, "get_topic", Method::GET, &url, None)
                .instrument(info_span!("gcp.pubsub.get_topic", topic = %id))
                .await,
        )
    }

    async fn create(&self, spec: &TopicSpec) -> ProviderResult<String> {
        let url = self.url(spec, &spec.name);
        self.client
            .call(SERVICE, "create_topic", Method::PUT, &url, Some(&json!({})))
            .instrument(info_span!("gcp.pubsub.create_topic", topic = %spec.name))
            .await?;
        Ok(spec.name.clone())
    }

    async fn delete(&self, spec: &TopicSpec, id: &str) -> ProviderResult<()> {
        let url = self.url(spec, id);
        self.client
            .call(SERVICE, "delete_topic", Method::DELETE, &url, None)
            .instrument(info_span!("gcp.pubsub.delete_topic", topic = %id))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PubSubSubscriptions {
    client: Arc<GcpRestClient>,
    endpoint: String,
}

impl PubSubSubscriptions {
    pub fn new(client: Arc<GcpRestClient>, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, spec: &SubscriptionSpec, name: &str) -> String {
        format!(
            "{}/v1/projects/{}/subscriptions/{}",
            self.endpoint,
            encode_segment(&spec.project),
            encode_segment(name)
        )
    }
}

/// Request body of `projects.subscriptions.create`
pub fn subscription_body(spec: &SubscriptionSpec) -> serde_json::Value {
    let mut body = json!({
        "topic": topic_path(&spec.project, &spec.topic),
        "retainAckedMessages": spec.retain_acked_messages,
    });
    if let Some(deadline) = spec.ack_deadline_seconds {
        body["ackDeadlineSeconds"] = json!(deadline);
    }
    if let Some(retention) = &spec.retention_duration {
        body["messageRetentionDuration"] = json!(retention);
    }
    body
}

#[async_trait]
impl ExternalResourceProvider for PubSubSubscriptions {
    type Spec = SubscriptionSpec;

    fn kind(&self) -> &'static str {
        "subscription"
    }

    fn requested_id<'a>(&self, spec: &'a SubscriptionSpec) -> Option<&'a str> {
        Some(&spec.name)
    }

    async fn exists(&self, spec: &SubscriptionSpec, id: &str) -> ProviderResult<bool> {
        let url = self.url(spec, id);
        exists_from(
            self.client
                .call(SERVICE, "get_subscription", Method::GET, &url, None)
                .instrument(info_span!("gcp.pubsub.get_subscription", subscription = %id))
                .await,
        )
    }

    async fn create(&self, spec: &SubscriptionSpec) -> ProviderResult<String> {
        let url = self.url(spec, &spec.name);
        let body = subscription_body(spec);
        self.client
            .call(SERVICE, "create_subscription", Method::PUT, &url, Some(&body))
            .instrument(info_span!(
                "gcp.pubsub.create_subscription",
                subscription = %spec.name,
                topic = %spec.topic
            ))
            .await?;
        Ok(spec.name.clone())
    }

    async fn delete(&self, spec: &SubscriptionSpec, id: &str) -> ProviderResult<()> {
        let url = self.url(spec, id);
        self.client
            .call(SERVICE, "delete_subscription", Method::DELETE, &url, None)
            .instrument(info_span!("gcp.pubsub.delete_subscription", subscription = %id))
            .await?;
        Ok(())
    }
}
