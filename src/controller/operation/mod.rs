//! # Operation Jobs
//!
//! Some mutations run outside the controller process, under a different
//! identity. An operation is submitted, polled until it reaches a terminal
//! state, and its outcome is read from a single result record written by the
//! execution unit at exit.
//!
//! ```text
//! Submitted -> Running -> Succeeded(result) | Failed(result or unknown)
//! ```
//!
//! Polling never blocks: a running operation makes the reconcile pass
//! requeue itself. Submission is idempotent, so observing the same terminal
//! operation twice re-derives the same status.
//!
//! ## Module Structure
//!
//! - `job.rs` - `batch/v1` Job runner
//! - `local.rs` - In-process runner

mod job;
mod local;

pub use job::{build_job, KubeJobRunner};
pub use local::LocalRunner;

use crate::controller::lifecycle::{get_or_create, get_or_delete, Removal};
use crate::crd::SecretKeyRef;
use crate::provider::{ExternalResourceProvider, NotificationSpec, ProviderError};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kubernetes object names are limited to 63 characters when used as labels
const MAX_JOB_NAME_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationAction {
    Exists,
    Create,
    Delete,
}

impl OperationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exists" => Ok(Self::Exists),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown action value {other}")),
        }
    }
}

/// Arguments of a notification operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationArgs {
    pub action: OperationAction,
    pub project: String,
    pub bucket: String,
    pub topic: String,
    /// Cloud Storage event type names
    pub event_types: Vec<String>,
    pub object_name_prefix: Option<String>,
    pub custom_attributes: BTreeMap<String, String>,
    /// Recorded notification id, if any
    pub notification_id: Option<String>,
    /// Credentials mounted into an out-of-process execution unit
    pub credentials: Option<SecretKeyRef>,
}

impl OperationArgs {
    /// Environment handed to the execution unit
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("ACTION".to_string(), self.action.to_string()),
            ("PROJECT_ID".to_string(), self.project.clone()),
            ("BUCKET".to_string(), self.bucket.clone()),
        ];
        match self.action {
            OperationAction::Create => {
                // A recorded id lets the execution unit re-validate instead of creating
                if let Some(id) = self.notification_id.as_deref().filter(|id| !id.is_empty()) {
                    env.push(("NOTIFICATION_ID".to_string(), id.to_string()));
                }
                env.push(("EVENT_TYPES".to_string(), self.event_types.join(":")));
                env.push(("PUBSUB_TOPIC_ID".to_string(), self.topic.clone()));
                env.push((
                    "OBJECT_NAME_PREFIX".to_string(),
                    self.object_name_prefix.clone().unwrap_or_default(),
                ));
                env.push((
                    "CUSTOM_ATTRIBUTES".to_string(),
                    serde_json::to_string(&self.custom_attributes).unwrap_or_default(),
                ));
            }
            OperationAction::Delete | OperationAction::Exists => {
                env.push((
                    "NOTIFICATION_ID".to_string(),
                    self.notification_id.clone().unwrap_or_default(),
                ));
            }
        }
        env
    }

    pub fn notification_spec(&self) -> NotificationSpec {
        NotificationSpec {
            bucket: self.bucket.clone(),
            project: self.project.clone(),
            topic: self.topic.clone(),
            event_types: self.event_types.clone(),
            object_name_prefix: self.object_name_prefix.clone(),
            custom_attributes: self.custom_attributes.clone(),
        }
    }
}

/// The record an operation owns its job through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOwner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl OperationOwner {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            uid: obj.uid().unwrap_or_default(),
        }
    }
}

/// Result record written by the execution unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationResult {
    pub result: bool,
    pub error: String,
    pub external_id: String,
    pub resolved_project_id: String,
}

impl OperationResult {
    pub fn success(external_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            result: true,
            error: String::new(),
            external_id: external_id.into(),
            resolved_project_id: project.into(),
        }
    }

    pub fn failure(error: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            result: false,
            error: error.into(),
            external_id: String::new(),
            resolved_project_id: project.into(),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"result":false,"error":"failed to encode result"}"#.to_string()
        })
    }

    pub fn decode(raw: &str) -> Result<Self, OperationError> {
        serde_json::from_str(raw.trim())
            .map_err(|e| OperationError::Observe(format!("malformed result record: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Succeeded(OperationResult),
    /// Failed, with the result record if one was written
    Failed(Option<OperationResult>),
}

/// Handle to a submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    pub name: String,
    pub namespace: String,
    pub action: OperationAction,
}

impl OperationHandle {
    /// The handle every submit of `action` for `owner` resolves to
    pub fn for_owner(owner: &OperationOwner, action: OperationAction) -> Self {
        Self {
            name: operation_job_name(&owner.name, &owner.uid, action),
            namespace: owner.namespace.clone(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("failed to submit operation: {0}")]
    Submit(String),
    #[error("failed to observe operation: {0}")]
    Observe(String),
}

/// Launches operations and observes their outcome
#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Start the operation unless it already exists
    async fn submit(
        &self,
        owner: &OperationOwner,
        args: &OperationArgs,
    ) -> Result<OperationHandle, OperationError>;

    /// Observe the operation without waiting for it
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState, OperationError>;

    /// Observe an operation an earlier pass may have submitted, without
    /// starting one. `None` when there is nothing to observe.
    async fn find(
        &self,
        owner: &OperationOwner,
        action: OperationAction,
    ) -> Result<Option<OperationState>, OperationError>;

    /// Discard a finished operation so the next submit starts afresh
    async fn forget(&self, handle: &OperationHandle) -> Result<(), OperationError>;
}

/// Deterministic job name for an owner and action.
///
/// The owner UID is kept whole; the owner name is truncated to fit.
pub fn operation_job_name(owner_name: &str, uid: &str, action: OperationAction) -> String {
    let budget = MAX_JOB_NAME_LEN.saturating_sub(uid.len() + 1);
    let prefix = format!("{owner_name}-{action}");
    let prefix: String = prefix.chars().take(budget).collect();
    let prefix = prefix.trim_end_matches(['-', '.']);
    if prefix.is_empty() {
        uid.to_string()
    } else {
        format!("{prefix}-{uid}")
    }
}

/// Run a notification operation in the current process
pub async fn execute<P>(provider: &P, args: &OperationArgs) -> OperationResult
where
    P: ExternalResourceProvider<Spec = NotificationSpec> + ?Sized,
{
    let spec = args.notification_spec();
    let recorded = args.notification_id.as_deref();
    let project = args.project.clone();

    match args.action {
        OperationAction::Create => match get_or_create(provider, &spec, recorded).await {
            Ok(ensured) => OperationResult::success(ensured.into_id(), project),
            Err(e) => OperationResult::failure(e.to_string(), project),
        },
        OperationAction::Delete => match get_or_delete(provider, &spec, recorded).await {
            Ok(Removal::Deleted | Removal::AlreadyGone | Removal::NeverCreated) => {
                OperationResult::success(recorded.unwrap_or_default(), project)
            }
            Err(e) => OperationResult::failure(e.to_string(), project),
        },
        OperationAction::Exists => {
            let Some(id) = recorded.filter(|id| !id.is_empty()) else {
                return OperationResult::failure("notification id is required", project);
            };
            match provider.exists(&spec, id).await {
                Ok(true) => OperationResult::success(id, project),
                Ok(false) => OperationResult::failure(
                    ProviderError::NotFound(id.to_string()).to_string(),
                    project,
                ),
                Err(e) => OperationResult::failure(e.to_string(), project),
            }
        }
    }
}
