//! PullSubscription strategy: the Pub/Sub subscription plus the receive
//! adapter consuming it.

use super::data_plane::{DataPlane, ReceiveAdapterSpec};
use super::resolve_project;
use crate::controller::conditions::{ConditionSet, SINK_RESOLVED};
use crate::controller::error::{ReconcileError, ReconcileResult};
use crate::controller::lifecycle::{get_or_create, get_or_delete, subscription_name};
use crate::controller::reconciler::{Action, Cleanup, ManagedResource, Pass, ReconcileStrategy};
use crate::controller::sink::SinkResolver;
use crate::crd::PullSubscription;
use crate::provider::{ExternalResourceProvider, ProjectResolver, SubscriptionSpec};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

pub const SUBSCRIBED: &str = "Subscribed";
pub const DEPLOYED: &str = "Deployed";

pub const CONDITIONS: ConditionSet = ConditionSet::new(&[SINK_RESOLVED, SUBSCRIBED, DEPLOYED]);

pub type SubscriptionProvider = dyn ExternalResourceProvider<Spec = SubscriptionSpec>;

pub struct PullSubscriptionStrategy {
    subscriptions: Arc<SubscriptionProvider>,
    data_plane: Arc<dyn DataPlane>,
    sinks: Arc<dyn SinkResolver>,
    projects: Arc<dyn ProjectResolver>,
    finalizer: String,
}

impl std::fmt::Debug for PullSubscriptionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSubscriptionStrategy")
            .field("finalizer", &self.finalizer)
            .finish_non_exhaustive()
    }
}

impl PullSubscriptionStrategy {
    pub fn new(
        subscriptions: Arc<SubscriptionProvider>,
        data_plane: Arc<dyn DataPlane>,
        sinks: Arc<dyn SinkResolver>,
        projects: Arc<dyn ProjectResolver>,
    ) -> Self {
        Self {
            subscriptions,
            data_plane,
            sinks,
            projects,
            finalizer: super::finalizer_name::<PullSubscription>(),
        }
    }

    fn subscription_spec(obj: &PullSubscription, project: String, name: String) -> SubscriptionSpec {
        SubscriptionSpec {
            project,
            name,
            topic: obj.spec.topic.clone(),
            ack_deadline_seconds: obj.spec.ack_deadline_seconds,
            retain_acked_messages: obj.spec.retain_acked_messages,
            retention_duration: obj.spec.retention_duration.clone(),
        }
    }
}

#[async_trait]
impl ReconcileStrategy<PullSubscription> for PullSubscriptionStrategy {
    fn finalizer(&self) -> &str {
        &self.finalizer
    }

    fn conditions(&self) -> ConditionSet {
        CONDITIONS
    }

    async fn prepare(&self, obj: &mut PullSubscription) -> ReconcileResult<()> {
        let recorded = obj.status.as_ref().and_then(|s| s.source.project_id.clone());
        match resolve_project(obj.spec.project.as_deref(), recorded.as_deref(), self.projects.as_ref())
            .await
        {
            Ok(project) => obj.status_mut().source.project_id = Some(project),
            Err(e) => {
                CONDITIONS.mark_false(
                    &mut obj.status_mut().source.conditions,
                    SUBSCRIBED,
                    "ProjectNotResolved",
                    e.to_string(),
                );
                return Err(e);
            }
        }

        let Some(transformer) = obj.spec.transformer.clone() else {
            obj.status_mut().transformer_uri = None;
            return Ok(());
        };
        let namespace = obj.namespace().unwrap_or_default();
        match self.sinks.resolve(&transformer, &namespace).await {
            Ok(uri) => {
                obj.status_mut().transformer_uri = Some(uri);
                Ok(())
            }
            Err(e) => {
                let status = obj.status_mut();
                status.transformer_uri = None;
                CONDITIONS.mark_false(
                    &mut status.source.conditions,
                    SINK_RESOLVED,
                    e.reason(),
                    format!("transformer: {e}"),
                );
                Err(e.into())
            }
        }
    }

    async fn converge(
        &self,
        obj: &mut PullSubscription,
        pass: &mut Pass<'_, PullSubscription>,
    ) -> ReconcileResult<Action> {
        let status = obj.status.clone().unwrap_or_default();
        let project = status
            .source
            .project_id
            .clone()
            .ok_or_else(|| ReconcileError::Permanent("project is required but not set".into()))?;
        let name = match status.subscription_id.filter(|id| !id.is_empty()) {
            Some(name) => name,
            None => {
                let uid = obj
                    .uid()
                    .ok_or_else(|| ReconcileError::Permanent("record has no uid".into()))?;
                subscription_name(&uid)
            }
        };

        obj.status_mut().subscription_id = Some(name.clone());
        pass.checkpoint(obj).await?;

        let spec = Self::subscription_spec(obj, project.clone(), name.clone());
        match get_or_create(self.subscriptions.as_ref(), &spec, Some(&name)).await {
            Ok(ensured) => {
                debug!(subscription = ensured.id(), "Subscription ready");
                CONDITIONS.mark_true(&mut obj.status_mut().source.conditions, SUBSCRIBED);
            }
            Err(e) => {
                CONDITIONS.mark_false(
                    &mut obj.status_mut().source.conditions,
                    SUBSCRIBED,
                    "SubscriptionFailed",
                    e.to_string(),
                );
                return Err(e.into());
            }
        }

        let adapter = ReceiveAdapterSpec {
            project,
            subscription: name,
            sink_uri: status.source.sink_uri.unwrap_or_default(),
            transformer_uri: status.transformer_uri,
        };
        match self.data_plane.apply(obj, &adapter).await {
            Ok(true) => {
                CONDITIONS.mark_true(&mut obj.status_mut().source.conditions, DEPLOYED);
            }
            Ok(false) => {
                CONDITIONS.mark_unknown(
                    &mut obj.status_mut().source.conditions,
                    DEPLOYED,
                    "DeploymentNotReady",
                    "the receive adapter is not available yet",
                );
            }
            Err(e) => {
                CONDITIONS.mark_false(
                    &mut obj.status_mut().source.conditions,
                    DEPLOYED,
                    "DeployFailed",
                    e.to_string(),
                );
                return Err(e.into());
            }
        }
        Ok(Action::await_change())
    }

    async fn cleanup(
        &self,
        obj: &mut PullSubscription,
        _pass: &mut Pass<'_, PullSubscription>,
    ) -> ReconcileResult<Cleanup> {
        let status = obj.status.clone().unwrap_or_default();
        let Some(name) = status.subscription_id.filter(|id| !id.is_empty()) else {
            return Ok(Cleanup::Finished);
        };
        let project = resolve_project(
            obj.spec.project.as_deref(),
            status.source.project_id.as_deref(),
            self.projects.as_ref(),
        )
        .await?;

        let spec = Self::subscription_spec(obj, project, name.clone());
        if let Err(e) = get_or_delete(self.subscriptions.as_ref(), &spec, Some(&name)).await {
            CONDITIONS.mark_false(
                &mut obj.status_mut().source.conditions,
                SUBSCRIBED,
                "SubscriptionDeleteFailed",
                e.to_string(),
            );
            return Err(e.into());
        }
        obj.status_mut().subscription_id = None;
        Ok(Cleanup::Finished)
    }
}
