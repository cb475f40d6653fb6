//! # Kinds
//!
//! Strategies plugged into the generic reconciler, one per source kind.
//!
//! ## Module Structure
//!
//! - `storage.rs` - CloudStorageSource: topic, owned PullSubscription, bucket notification
//! - `pull_subscription.rs` - PullSubscription: subscription and receive adapter
//! - `data_plane.rs` - Receive adapter Deployment and KEDA `ScaledObject`

pub mod data_plane;
pub mod pull_subscription;
pub mod storage;

pub use data_plane::{DataPlane, KubeDataPlane, ReceiveAdapterSpec};
pub use pull_subscription::PullSubscriptionStrategy;
pub use storage::StorageStrategy;

use crate::constants::{API_GROUP, AUTOSCALING_CLASS_ANNOTATION, KEDA_AUTOSCALING_CLASS};
use crate::controller::error::{ReconcileError, ReconcileResult};
use crate::provider::ProjectResolver;
use kube::{Resource, ResourceExt};
use tracing::debug;

/// Finalizer of a kind: `<plural>.<group>`
pub fn finalizer_name<K: Resource<DynamicType = ()>>() -> String {
    format!("{}.{API_GROUP}", K::plural(&()))
}

/// Project from the spec, then the one recorded in status, then the
/// metadata server.
pub async fn resolve_project(
    spec: Option<&str>,
    recorded: Option<&str>,
    resolver: &dyn ProjectResolver,
) -> ReconcileResult<String> {
    fn non_empty(p: Option<&str>) -> Option<&str> {
        p.map(str::trim).filter(|p| !p.is_empty())
    }

    if let Some(project) = non_empty(spec) {
        return Ok(project.to_string());
    }
    if let Some(project) = non_empty(recorded) {
        return Ok(project.to_string());
    }
    match resolver.project_id().await {
        Ok(project) if !project.trim().is_empty() => Ok(project.trim().to_string()),
        Ok(_) => Err(ReconcileError::Permanent(
            "project is required but not set".to_string(),
        )),
        // An unreachable metadata server is retried like any provider error
        Err(e) => {
            debug!(error = %e, "Project lookup failed");
            Err(ReconcileError::from(e))
        }
    }
}

/// Whether a record asks for KEDA autoscaling
pub fn is_keda_class<K: Resource>(obj: &K) -> bool {
    obj.annotations()
        .get(AUTOSCALING_CLASS_ANNOTATION)
        .is_some_and(|class| class == KEDA_AUTOSCALING_CLASS)
}

/// Whether `obj` names `owner_uid` as its controller
pub fn is_controlled_by<K: Resource>(obj: &K, owner_uid: &str) -> bool {
    obj.owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == owner_uid)
}
