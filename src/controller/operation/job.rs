//! Operation runner backed by `batch/v1` Jobs.
//!
//! The job's pod writes its result record to the container termination
//! message. Kubernetes keeps it on the terminated container state, where
//! `poll` reads it back.

use super::{
    operation_job_name, OperationAction, OperationArgs, OperationError, OperationHandle,
    OperationOwner, OperationResult, OperationRunner, OperationState,
};
use crate::constants::{
    DEFAULT_TERMINATION_LOG_PATH, LABEL_ACTION, LABEL_OWNER_UID, OPERATION_CREDENTIALS_MOUNT,
    OPERATION_JOB_BACKOFF_LIMIT,
};
use crate::crd::SecretKeyRef;
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const CREDENTIALS_VOLUME: &str = "google-cloud-key";

/// Runs operations as Kubernetes Jobs in the owner's namespace
#[derive(Clone)]
pub struct KubeJobRunner {
    client: Client,
    image: String,
    /// Secret used when the owner does not name one
    default_secret: Option<String>,
}

impl std::fmt::Debug for KubeJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeJobRunner")
            .field("image", &self.image)
            .field("default_secret", &self.default_secret)
            .finish_non_exhaustive()
    }
}

impl KubeJobRunner {
    pub fn new(client: Client, image: impl Into<String>, default_secret: Option<String>) -> Self {
        Self {
            client,
            image: image.into(),
            default_secret,
        }
    }

    fn credentials(&self, args: &OperationArgs) -> Option<SecretKeyRef> {
        args.credentials.clone().or_else(|| {
            self.default_secret.as_ref().map(|name| SecretKeyRef {
                name: name.clone(),
                key: "key.json".to_string(),
            })
        })
    }

    async fn read_result(
        &self,
        handle: &OperationHandle,
        succeeded: bool,
    ) -> Result<Option<OperationResult>, OperationError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &handle.namespace);
        let listed = pods
            .list(&ListParams::default().labels(&format!("job-name={}", handle.name)))
            .await
            .map_err(|e| OperationError::Observe(format!("listing pods of {}: {e}", handle.name)))?;
        Ok(result_from_pods(&listed.items, succeeded))
    }
}

fn labels(owner: &OperationOwner, args: &OperationArgs) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_ACTION.to_string(), args.action.to_string()),
        (LABEL_OWNER_UID.to_string(), owner.uid.clone()),
    ])
}

/// Build the Job executing `args` on behalf of `owner`
pub fn build_job(
    owner: &OperationOwner,
    args: &OperationArgs,
    image: &str,
    credentials: Option<&SecretKeyRef>,
) -> Job {
    let name = operation_job_name(&owner.name, &owner.uid, args.action);
    let labels = labels(owner, args);

    let mut env: Vec<EnvVar> = args
        .env()
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..EnvVar::default()
        })
        .collect();
    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    if let Some(secret) = credentials {
        env.push(EnvVar {
            name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            value: Some(format!("{OPERATION_CREDENTIALS_MOUNT}/{}", secret.key)),
            ..EnvVar::default()
        });
        volumes.push(Volume {
            name: CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        });
        volume_mounts.push(VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: OPERATION_CREDENTIALS_MOUNT.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        });
    }

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(owner.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![OwnerReference {
                api_version: owner.api_version.clone(),
                kind: owner.kind.clone(),
                name: owner.name.clone(),
                uid: owner.uid.clone(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(OPERATION_JOB_BACKOFF_LIMIT),
            parallelism: Some(1),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "job".to_string(),
                        image: Some(image.to_string()),
                        env: Some(env),
                        termination_message_path: Some(DEFAULT_TERMINATION_LOG_PATH.to_string()),
                        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
                        ..Container::default()
                    }],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

/// Terminal state of a job from its status, without the result record
fn job_phase(job: &Job) -> Option<bool> {
    let status = job.status.as_ref()?;
    if status.succeeded.unwrap_or(0) >= 1 {
        return Some(true);
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    failed.then_some(false)
}

/// Pick the result record from the job's pods.
///
/// A succeeded job takes the record of a container that exited zero; a
/// failed one takes any record left behind.
pub(crate) fn result_from_pods(pods: &[Pod], succeeded: bool) -> Option<OperationResult> {
    pods.iter()
        .filter_map(|pod| pod.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref())
        .filter(|terminated| !succeeded || terminated.exit_code == 0)
        .filter_map(|terminated| terminated.message.as_deref())
        .filter(|message| !message.trim().is_empty())
        .find_map(|message| match OperationResult::decode(message) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable operation result");
                None
            }
        })
}

#[async_trait]
impl OperationRunner for KubeJobRunner {
    async fn submit(
        &self,
        owner: &OperationOwner,
        args: &OperationArgs,
    ) -> Result<OperationHandle, OperationError> {
        let credentials = self.credentials(args);
        let job = build_job(owner, args, &self.image, credentials.as_ref());
        let handle = OperationHandle::for_owner(owner, args.action);

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &owner.namespace);
        match jobs.create(&PostParams::default(), &job).await {
            Ok(_) => {
                info!(job = %handle.name, action = %args.action, "Submitted operation job");
                metrics::increment_operation_jobs_submitted(args.action.as_str());
                Ok(handle)
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                debug!(job = %handle.name, "Operation job already exists");
                Ok(handle)
            }
            Err(e) => Err(OperationError::Submit(format!("{}: {e}", handle.name))),
        }
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState, OperationError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &handle.namespace);
        let job = match jobs.get(&handle.name).await {
            Ok(job) => job,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                return Err(OperationError::Observe(format!(
                    "job {} disappeared",
                    handle.name
                )));
            }
            Err(e) => return Err(OperationError::Observe(format!("{}: {e}", handle.name))),
        };

        let Some(succeeded) = job_phase(&job) else {
            return Ok(OperationState::Running);
        };
        let result = self.read_result(handle, succeeded).await?;
        let outcome = if succeeded { "succeeded" } else { "failed" };
        metrics::increment_operation_jobs_completed(handle.action.as_str(), outcome);

        Ok(match result {
            Some(result) if succeeded && result.result => OperationState::Succeeded(result),
            // A terminal job without a record counts as failed
            other => OperationState::Failed(other),
        })
    }

    async fn find(
        &self,
        owner: &OperationOwner,
        action: OperationAction,
    ) -> Result<Option<OperationState>, OperationError> {
        let handle = OperationHandle::for_owner(owner, action);
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &handle.namespace);
        match jobs.get_opt(&handle.name).await {
            Ok(Some(_)) => self.poll(&handle).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(OperationError::Observe(format!("{}: {e}", handle.name))),
        }
    }

    async fn forget(&self, handle: &OperationHandle) -> Result<(), OperationError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &handle.namespace);
        match jobs.delete(&handle.name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(job = %handle.name, "Deleted finished operation job");
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(OperationError::Observe(format!("{}: {e}", handle.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };

    fn owner() -> OperationOwner {
        OperationOwner {
            api_version: "sources.cloud-events.dev/v1alpha1".into(),
            kind: "CloudStorageSource".into(),
            name: "uploads".into(),
            namespace: "default".into(),
            uid: "uid-1".into(),
        }
    }

    fn args(action: OperationAction) -> OperationArgs {
        OperationArgs {
            action,
            project: "proj".into(),
            bucket: "b".into(),
            topic: "gcs-1".into(),
            event_types: vec!["OBJECT_FINALIZE".into()],
            object_name_prefix: None,
            custom_attributes: BTreeMap::new(),
            notification_id: None,
            credentials: None,
        }
    }

    fn pod(exit_code: i32, message: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "job".into(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code,
                            message: message.map(ToString::to_string),
                            ..ContainerStateTerminated::default()
                        }),
                        ..ContainerState::default()
                    }),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_build_job_shape() {
        let secret = SecretKeyRef {
            name: "gcs-key".into(),
            key: "key.json".into(),
        };
        let job = build_job(&owner(), &args(OperationAction::Create), "agent:1", Some(&secret));
        assert_eq!(job.metadata.name.as_deref(), Some("uploads-create-uid-1"));

        let owner_ref = &job.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner_ref.controller, Some(true));
        assert_eq!(owner_ref.uid, "uid-1");

        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[LABEL_ACTION], "create");
        assert_eq!(labels[LABEL_OWNER_UID], "uid-1");

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(3));
        assert_eq!(spec.parallelism, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let container = &pod.containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "GOOGLE_APPLICATION_CREDENTIALS"
            && e.value.as_deref() == Some("/var/secrets/google/key.json")));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/var/secrets/google"
        );
        assert_eq!(
            pod.volumes.unwrap()[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("gcs-key")
        );
    }

    #[test]
    fn test_build_job_without_credentials_mounts_nothing() {
        let job = build_job(&owner(), &args(OperationAction::Delete), "agent:1", None);
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert!(pod.volumes.is_none());
        assert!(pod.containers[0].volume_mounts.is_none());
    }

    #[test]
    fn test_job_phase() {
        let mut job = Job::default();
        assert_eq!(job_phase(&job), None);

        job.status = Some(JobStatus {
            succeeded: Some(1),
            ..JobStatus::default()
        });
        assert_eq!(job_phase(&job), Some(true));

        job.status = Some(JobStatus {
            failed: Some(4),
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "True".into(),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        });
        assert_eq!(job_phase(&job), Some(false));
    }

    #[test]
    fn test_result_from_pods_prefers_successful_container() {
        let failed = pod(1, Some(r#"{"result":false,"error":"quota"}"#));
        let ok = pod(0, Some(r#"{"result":true,"externalId":"42"}"#));
        let pods = vec![failed, ok];

        let result = result_from_pods(&pods, true).unwrap();
        assert_eq!(result.external_id, "42");

        let first_failure = result_from_pods(&pods[..1], false).unwrap();
        assert_eq!(first_failure.error, "quota");
    }

    #[test]
    fn test_result_from_pods_without_record() {
        assert!(result_from_pods(&[pod(1, None)], false).is_none());
        assert!(result_from_pods(&[pod(0, Some("garbage"))], true).is_none());
    }
}
