//! Receive adapter workloads for PullSubscriptions.
//!
//! Each subscription gets a Deployment pulling from it and forwarding to the
//! sink. KEDA-class subscriptions also get a `ScaledObject` that scales the
//! Deployment on subscription backlog; the Deployment then leaves its
//! replica count to KEDA.

use super::is_keda_class;
use crate::constants::{
    DEFAULT_KEDA_COOLDOWN_PERIOD, DEFAULT_KEDA_POLLING_INTERVAL, DEFAULT_KEDA_SUBSCRIPTION_SIZE,
    DEFAULT_MAX_SCALE, DEFAULT_MIN_SCALE, FIELD_MANAGER, KEDA_COOLDOWN_PERIOD_ANNOTATION,
    KEDA_POLLING_INTERVAL_ANNOTATION, KEDA_SUBSCRIPTION_SIZE_ANNOTATION, LABEL_RECEIVE_ADAPTER,
    MAX_SCALE_ANNOTATION, MIN_SCALE_ANNOTATION,
};
use crate::controller::reconciler::StoreError;
use crate::crd::{PullSubscription, ScaleTargetRef, ScaleTrigger, ScaledObject, ScaledObjectSpec};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

const ADAPTER_CONTAINER: &str = "receive-adapter";
const KEDA_TRIGGER_TYPE: &str = "gcp-pubsub";

/// What the receive adapter needs to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveAdapterSpec {
    pub project: String,
    pub subscription: String,
    pub sink_uri: String,
    pub transformer_uri: Option<String>,
}

/// Runs the receive adapter of a PullSubscription
#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Apply the workload and report whether it is available
    async fn apply(
        &self,
        owner: &PullSubscription,
        adapter: &ReceiveAdapterSpec,
    ) -> Result<bool, StoreError>;
}

/// Name of the adapter Deployment (and ScaledObject) of a subscription
pub fn adapter_name(owner: &PullSubscription) -> String {
    format!("{}-adapter", owner.name_any())
}

/// KEDA scaling settings read from annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingSettings {
    pub min_scale: i32,
    pub max_scale: i32,
    pub polling_interval: i32,
    pub cooldown_period: i32,
    pub subscription_size: i32,
}

impl ScalingSettings {
    /// Unparseable or missing annotations fall back to their defaults
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let read = |key: &str, default: i32| {
            annotations
                .get(key)
                .and_then(|v| v.trim().parse::<i32>().ok())
                .unwrap_or(default)
        };
        Self {
            min_scale: read(MIN_SCALE_ANNOTATION, DEFAULT_MIN_SCALE),
            max_scale: read(MAX_SCALE_ANNOTATION, DEFAULT_MAX_SCALE),
            polling_interval: read(KEDA_POLLING_INTERVAL_ANNOTATION, DEFAULT_KEDA_POLLING_INTERVAL),
            cooldown_period: read(KEDA_COOLDOWN_PERIOD_ANNOTATION, DEFAULT_KEDA_COOLDOWN_PERIOD),
            subscription_size: read(
                KEDA_SUBSCRIPTION_SIZE_ANNOTATION,
                DEFAULT_KEDA_SUBSCRIPTION_SIZE,
            ),
        }
    }
}

fn owned_meta(owner: &PullSubscription, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: owner.namespace(),
        labels: Some(adapter_labels(owner)),
        owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
        ..ObjectMeta::default()
    }
}

fn adapter_labels(owner: &PullSubscription) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_RECEIVE_ADAPTER.to_string(), owner.name_any())])
}

/// Build the receive adapter Deployment
pub fn build_deployment(
    owner: &PullSubscription,
    adapter: &ReceiveAdapterSpec,
    image: &str,
) -> Deployment {
    let labels = adapter_labels(owner);
    let env = [
        ("PROJECT_ID", Some(adapter.project.clone())),
        ("SUBSCRIPTION_ID", Some(adapter.subscription.clone())),
        ("SINK_URI", Some(adapter.sink_uri.clone())),
        ("TRANSFORMER_URI", adapter.transformer_uri.clone()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.unwrap_or_default()),
        ..EnvVar::default()
    })
    .collect();

    Deployment {
        metadata: owned_meta(owner, adapter_name(owner)),
        spec: Some(DeploymentSpec {
            // KEDA owns the replica count of scaled adapters
            replicas: (!is_keda_class(owner)).then_some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: ADAPTER_CONTAINER.to_string(),
                        image: Some(image.to_string()),
                        env: Some(env),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Build the `ScaledObject` scaling the adapter on subscription backlog
pub fn build_scaled_object(owner: &PullSubscription, adapter: &ReceiveAdapterSpec) -> ScaledObject {
    let settings = ScalingSettings::from_annotations(owner.annotations());
    let metadata = BTreeMap::from([
        (
            "subscriptionName".to_string(),
            format!("projects/{}/subscriptions/{}", adapter.project, adapter.subscription),
        ),
        (
            "subscriptionSize".to_string(),
            settings.subscription_size.to_string(),
        ),
    ]);
    let name = adapter_name(owner);
    let mut scaled = ScaledObject::new(
        &name,
        ScaledObjectSpec {
            scale_target_ref: ScaleTargetRef { name: name.clone() },
            min_replica_count: Some(settings.min_scale),
            max_replica_count: Some(settings.max_scale),
            polling_interval: Some(settings.polling_interval),
            cooldown_period: Some(settings.cooldown_period),
            triggers: vec![ScaleTrigger {
                r#type: KEDA_TRIGGER_TYPE.to_string(),
                metadata,
            }],
        },
    );
    scaled.metadata = owned_meta(owner, name);
    scaled
}

/// Deployment has the `Available` condition set to True
pub fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// Server-side applies adapter workloads
pub struct KubeDataPlane {
    client: Client,
    image: String,
}

impl std::fmt::Debug for KubeDataPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDataPlane")
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

impl KubeDataPlane {
    pub fn new(client: Client, image: impl Into<String>) -> Self {
        Self {
            client,
            image: image.into(),
        }
    }
}

#[async_trait]
impl DataPlane for KubeDataPlane {
    async fn apply(
        &self,
        owner: &PullSubscription,
        adapter: &ReceiveAdapterSpec,
    ) -> Result<bool, StoreError> {
        let namespace = owner.namespace().unwrap_or_default();
        let name = adapter_name(owner);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let deployment = build_deployment(owner, adapter, &self.image);
        let applied = deployments
            .patch(&name, &params, &Patch::Apply(&deployment))
            .await?;
        debug!(deployment = %name, "Applied receive adapter");

        let scaled_objects: Api<ScaledObject> = Api::namespaced(self.client.clone(), &namespace);
        if is_keda_class(owner) {
            let scaled = build_scaled_object(owner, adapter);
            scaled_objects
                .patch(&name, &params, &Patch::Apply(&scaled))
                .await?;
            debug!(scaled_object = %name, "Applied ScaledObject");
        } else {
            match scaled_objects.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!(scaled_object = %name, "Removed ScaledObject of a non-KEDA subscription"),
                Err(kube::Error::Api(api_err)) if api_err.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(is_available(&applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{AUTOSCALING_CLASS_ANNOTATION, KEDA_AUTOSCALING_CLASS};
    use crate::crd::{Destination, PullSubscriptionSpec};

    fn subscription(annotations: &[(&str, &str)]) -> PullSubscription {
        let mut ps = PullSubscription::new(
            "orders",
            PullSubscriptionSpec {
                topic: "orders".into(),
                project: Some("proj".into()),
                sink: Destination::default(),
                transformer: None,
                ack_deadline_seconds: None,
                retain_acked_messages: false,
                retention_duration: None,
            },
        );
        ps.metadata.namespace = Some("shop".into());
        ps.metadata.uid = Some("ps-uid".into());
        ps.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        ps
    }

    fn adapter() -> ReceiveAdapterSpec {
        ReceiveAdapterSpec {
            project: "proj".into(),
            subscription: "cre-pull-ps-uid".into(),
            sink_uri: "http://display.shop.svc.cluster.local/".into(),
            transformer_uri: None,
        }
    }

    #[test]
    fn test_deployment_env_and_owner() {
        let ps = subscription(&[]);
        let deployment = build_deployment(&ps, &adapter(), "adapter:latest");

        assert_eq!(deployment.metadata.name.as_deref(), Some("orders-adapter"));
        let owner = &deployment.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "ps-uid");
        assert_eq!(owner.controller, Some(true));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let container = &spec.template.spec.unwrap().containers[0];
        let env: BTreeMap<_, _> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.as_str(), e.value.clone().unwrap_or_default()))
            .collect();
        assert_eq!(env["SUBSCRIPTION_ID"], "cre-pull-ps-uid");
        assert_eq!(env["SINK_URI"], "http://display.shop.svc.cluster.local/");
        assert_eq!(env["TRANSFORMER_URI"], "");
    }

    #[test]
    fn test_keda_deployment_leaves_replicas_unset() {
        let ps = subscription(&[(AUTOSCALING_CLASS_ANNOTATION, KEDA_AUTOSCALING_CLASS)]);
        let deployment = build_deployment(&ps, &adapter(), "adapter:latest");
        assert_eq!(deployment.spec.unwrap().replicas, None);
    }

    #[test]
    fn test_scaled_object_defaults() {
        let ps = subscription(&[(AUTOSCALING_CLASS_ANNOTATION, KEDA_AUTOSCALING_CLASS)]);
        let scaled = build_scaled_object(&ps, &adapter());

        assert_eq!(scaled.spec.scale_target_ref.name, "orders-adapter");
        assert_eq!(scaled.spec.min_replica_count, Some(0));
        assert_eq!(scaled.spec.max_replica_count, Some(1));
        assert_eq!(scaled.spec.polling_interval, Some(15));
        assert_eq!(scaled.spec.cooldown_period, Some(120));
        let trigger = &scaled.spec.triggers[0];
        assert_eq!(trigger.r#type, "gcp-pubsub");
        assert_eq!(
            trigger.metadata["subscriptionName"],
            "projects/proj/subscriptions/cre-pull-ps-uid"
        );
        assert_eq!(trigger.metadata["subscriptionSize"], "100");
    }

    #[test]
    fn test_scaling_annotations_override_defaults() {
        let ps = subscription(&[
            (AUTOSCALING_CLASS_ANNOTATION, KEDA_AUTOSCALING_CLASS),
            (MIN_SCALE_ANNOTATION, "1"),
            (MAX_SCALE_ANNOTATION, "8"),
            (KEDA_SUBSCRIPTION_SIZE_ANNOTATION, "25"),
            (KEDA_COOLDOWN_PERIOD_ANNOTATION, "not-a-number"),
        ]);
        let settings = ScalingSettings::from_annotations(ps.annotations());
        assert_eq!(settings.min_scale, 1);
        assert_eq!(settings.max_scale, 8);
        assert_eq!(settings.subscription_size, 25);
        assert_eq!(settings.cooldown_period, DEFAULT_KEDA_COOLDOWN_PERIOD);
    }

    #[test]
    fn test_availability_from_conditions() {
        let deployment: Deployment = serde_json::from_value(serde_json::json!({
            "status": {"conditions": [{"type": "Available", "status": "True"}]}
        }))
        .unwrap();
        assert!(is_available(&deployment));
        assert!(!is_available(&Deployment::default()));
    }
}
