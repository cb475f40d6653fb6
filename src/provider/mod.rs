//! # Provider Capabilities
//!
//! The external systems the controllers converge are reached through one
//! small capability per resource kind: check existence, create, delete.
//! Every failure is classified where it happens so callers never see an
//! unclassified error.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod gcp;

/// Classified failure of a provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider rejected request: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Classify an HTTP status returned by a provider API.
    ///
    /// Anything not recognised as permanent is treated as transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            409 => Self::AlreadyExists(message),
            400 | 401 | 403 | 405 | 412 | 422 => Self::Permanent(message),
            _ => Self::Transient(message),
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None => Self::Transient(err.to_string()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Create/check/delete capability for one kind of external resource
#[async_trait]
pub trait ExternalResourceProvider: Send + Sync {
    /// Everything needed to address or create the resource
    type Spec: Send + Sync;

    /// Short name used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Identifier the caller chose up front, if the API lets callers name
    /// resources. An AlreadyExists on create resolves to this identifier.
    fn requested_id<'a>(&self, spec: &'a Self::Spec) -> Option<&'a str> {
        let _ = spec;
        None
    }

    async fn exists(&self, spec: &Self::Spec, id: &str) -> ProviderResult<bool>;

    /// Create the resource and return its identifier
    async fn create(&self, spec: &Self::Spec) -> ProviderResult<String>;

    async fn delete(&self, spec: &Self::Spec, id: &str) -> ProviderResult<()>;
}

/// Resolves the project to use when a spec leaves it empty
#[async_trait]
pub trait ProjectResolver: Send + Sync {
    async fn project_id(&self) -> ProviderResult<String>;
}

/// A Pub/Sub topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub project: String,
    pub name: String,
}

/// A Pub/Sub pull subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub project: String,
    pub name: String,
    pub topic: String,
    pub ack_deadline_seconds: Option<i32>,
    pub retain_acked_messages: bool,
    pub retention_duration: Option<String>,
}

/// A Cloud Storage bucket notification publishing to a topic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSpec {
    pub bucket: String,
    pub project: String,
    pub topic: String,
    /// Storage API event type names, e.g. `OBJECT_FINALIZE`
    pub event_types: Vec<String>,
    pub object_name_prefix: Option<String>,
    pub custom_attributes: BTreeMap<String, String>,
}

/// Map user-facing event type names onto Cloud Storage ones.
///
/// An empty list selects `OBJECT_FINALIZE`.
pub fn storage_event_types(event_types: &[String]) -> Result<Vec<String>, String> {
    if event_types.is_empty() {
        return Ok(vec!["OBJECT_FINALIZE".to_string()]);
    }
    event_types
        .iter()
        .map(|event_type| match event_type.as_str() {
            "finalize" => Ok("OBJECT_FINALIZE".to_string()),
            "archive" => Ok("OBJECT_ARCHIVE".to_string()),
            "delete" => Ok("OBJECT_DELETE".to_string()),
            "metadataUpdate" => Ok("OBJECT_METADATA_UPDATE".to_string()),
            other => Err(format!("unknown event type {other}")),
        })
        .collect()
}
