//! Cloud Storage bucket notifications over the JSON API v1.
//!
//! Notification ids are assigned by Cloud Storage, so create first looks for
//! a notification on the same bucket already publishing to the requested
//! topic and adopts it. That keeps a retried create from stacking duplicates.

use super::rest::{encode_segment, GcpRestClient};
use crate::constants::{CE_TYPE_ATTRIBUTE, CE_TYPE_STORAGE};
use crate::provider::{ExternalResourceProvider, NotificationSpec, ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

const SERVICE: &str = "storage";
const PUBSUB_RESOURCE_PREFIX: &str = "//pubsub.googleapis.com/";

#[derive(Debug, Deserialize)]
struct NotificationList {
    #[serde(default)]
    items: Vec<NotificationResource>,
}

#[derive(Debug, Deserialize)]
struct NotificationResource {
    id: String,
    #[serde(default)]
    topic: String,
}

/// Canonical topic reference used by the Storage API
pub fn storage_topic(project: &str, topic: &str) -> String {
    format!("{PUBSUB_RESOURCE_PREFIX}projects/{project}/topics/{topic}")
}

fn same_topic(a: &str, b: &str) -> bool {
    a.trim_start_matches(PUBSUB_RESOURCE_PREFIX) == b.trim_start_matches(PUBSUB_RESOURCE_PREFIX)
}

/// Request body of `notifications.insert`
pub fn notification_body(spec: &NotificationSpec) -> serde_json::Value {
    let mut attributes = spec.custom_attributes.clone();
    attributes.insert(CE_TYPE_ATTRIBUTE.to_string(), CE_TYPE_STORAGE.to_string());

    let mut body = json!({
        "topic": storage_topic(&spec.project, &spec.topic),
        "payload_format": "JSON_API_V1",
        "event_types": spec.event_types,
        "custom_attributes": attributes,
    });
    if let Some(prefix) = spec.object_name_prefix.as_deref().filter(|p| !p.is_empty()) {
        body["object_name_prefix"] = json!(prefix);
    }
    body
}

#[derive(Debug, Clone)]
pub struct StorageNotifications {
    client: Arc<GcpRestClient>,
    endpoint: String,
}

impl StorageNotifications {
    pub fn new(client: Arc<GcpRestClient>, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn collection_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/notificationConfigs",
            self.endpoint,
            encode_segment(bucket)
        )
    }

    async fn find_by_topic(&self, spec: &NotificationSpec) -> ProviderResult<Option<String>> {
        let url = self.collection_url(&spec.bucket);
        let listed = self
            .client
            .call(SERVICE, "list_notifications", Method::GET, &url, None)
            .instrument(info_span!("gcp.storage.list_notifications", bucket = %spec.bucket))
            .await?;
        let Some(listed) = listed else {
            return Ok(None);
        };
        let list: NotificationList = serde_json::from_value(listed)
            .map_err(|e| ProviderError::Transient(format!("malformed notification list: {e}")))?;
        let wanted = storage_topic(&spec.project, &spec.topic);
        Ok(list
            .items
            .into_iter()
            .find(|n| same_topic(&n.topic, &wanted))
            .map(|n| n.id))
    }
}

#[async_trait]
impl ExternalResourceProvider for StorageNotifications {
    type Spec = NotificationSpec;

    fn kind(&self) -> &'static str {
        "notification"
    }

    async fn exists(&self, spec: &NotificationSpec, id: &str) -> ProviderResult<bool> {
        let url = format!("{}/{}", self.collection_url(&spec.bucket), encode_segment(id));
        match self
            .client
            .call(SERVICE, "get_notification", Method::GET, &url, None)
            .instrument(info_span!("gcp.storage.get_notification", bucket = %spec.bucket, id))
            .await
        {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, spec: &NotificationSpec) -> ProviderResult<String> {
        if let Some(id) = self.find_by_topic(spec).await? {
            debug!(bucket = %spec.bucket, id = %id, "Adopting existing notification for topic");
            return Ok(id);
        }

        let url = self.collection_url(&spec.bucket);
        let body = notification_body(spec);
        let created = self
            .client
            .call(SERVICE, "insert_notification", Method::POST, &url, Some(&body))
            .instrument(info_span!(
                "gcp.storage.insert_notification",
                bucket = %spec.bucket,
                topic = %spec.topic
            ))
            .await?;
        let created = created.ok_or_else(|| {
            ProviderError::Transient("notification insert returned no body".to_string())
        })?;
        let resource: NotificationResource = serde_json::from_value(created)
            .map_err(|e| ProviderError::Transient(format!("malformed notification: {e}")))?;
        Ok(resource.id)
    }

    async fn delete(&self, spec: &NotificationSpec, id: &str) -> ProviderResult<()> {
        let url = format!("{}/{}", self.collection_url(&spec.bucket), encode_segment(id));
        self.client
            .call(SERVICE, "delete_notification", Method::DELETE, &url, None)
            .instrument(info_span!("gcp.storage.delete_notification", bucket = %spec.bucket, id))
            .await?;
        Ok(())
    }
}
