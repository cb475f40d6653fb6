//! # Controllers
//!
//! Wiring of each controller: its record store, strategy dependencies,
//! work queue, watches and worker pool.

use super::kube_store::KubeStore;
use super::watch::{accept_all, fan_in_owned, watch_primary, KeyFilter};
use super::workers::run_workers;
use crate::config::ControllerConfig;
use crate::constants::{LABEL_OWNER_UID, LABEL_RECEIVE_ADAPTER};
use crate::controller::kinds::{
    is_keda_class, KubeDataPlane, PullSubscriptionStrategy, StorageStrategy,
};
use crate::controller::operation::{KubeJobRunner, LocalRunner, OperationRunner};
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::{KubeEventPublisher, Reconcile, Reconciler};
use crate::controller::sink::{KubeSinkResolver, SinkResolver};
use crate::crd::{CloudStorageSource, PullSubscription, ScaledObject};
use crate::provider::gcp::{
    GcpRestClient, MetadataClient, PubSubSubscriptions, PubSubTopics, StorageNotifications,
};
use crate::provider::ProjectResolver;
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Controllers the binary can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    Storage,
    PullSubscription,
    Keda,
}

impl ControllerKind {
    pub const ALL: [Self; 3] = [Self::Storage, Self::PullSubscription, Self::Keda];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::PullSubscription => "pullsubscription",
            Self::Keda => "keda",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storage" | "cloudstoragesource" => Ok(Self::Storage),
            "pullsubscription" | "pubsub" => Ok(Self::PullSubscription),
            "keda" => Ok(Self::Keda),
            other => Err(format!("unknown controller {other:?}")),
        }
    }
}

/// Dependencies shared by every controller
pub struct ControllerContext {
    client: Client,
    config: ControllerConfig,
    gcp: Arc<GcpRestClient>,
    sinks: Arc<dyn SinkResolver>,
    projects: Arc<dyn ProjectResolver>,
}

impl fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ControllerContext {
    pub fn new(client: Client, config: ControllerConfig) -> Result<Self> {
        let gcp = Arc::new(
            GcpRestClient::new(config.metadata_endpoint.clone())
                .context("Failed to create GCP client")?,
        );
        Ok(Self {
            sinks: Arc::new(KubeSinkResolver::new(client.clone())),
            projects: Arc::new(MetadataClient::new(gcp.clone())),
            client,
            config,
            gcp,
        })
    }

    fn queue(&self, name: &str) -> WorkQueue {
        WorkQueue::new(
            name,
            self.config.backoff_start_duration(),
            self.config.backoff_max_duration(),
        )
    }

    fn operation_runner(&self) -> Arc<dyn OperationRunner> {
        match &self.config.notification_operation_image {
            Some(image) => {
                info!(image = %image, "Notification operations run as Jobs");
                Arc::new(KubeJobRunner::new(
                    self.client.clone(),
                    image.clone(),
                    self.config.notification_operation_secret.clone(),
                ))
            }
            None => {
                info!("Notification operations run in process");
                Arc::new(LocalRunner::new(Arc::new(StorageNotifications::new(
                    self.gcp.clone(),
                    &self.config.storage_endpoint,
                ))))
            }
        }
    }
}

/// A started controller
pub struct RunningController {
    kind: ControllerKind,
    queue: WorkQueue,
    watches: Vec<JoinHandle<()>>,
    workers: JoinHandle<()>,
}

impl fmt::Debug for RunningController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningController")
            .field("kind", &self.kind)
            .field("queue", &self.queue.name())
            .finish_non_exhaustive()
    }
}

impl RunningController {
    /// Stop the watches and let the workers finish their current keys
    pub async fn shutdown(self, grace: Duration) {
        self.queue.shutdown().await;
        for watch in &self.watches {
            watch.abort();
        }
        match tokio::time::timeout(grace, self.workers).await {
            Ok(Ok(())) => info!(controller = %self.kind, "Controller stopped"),
            Ok(Err(e)) => warn!(controller = %self.kind, error = %e, "Worker pool failed"),
            Err(_) => warn!(controller = %self.kind, "Workers did not stop within the grace period"),
        }
    }
}

pub fn start(ctx: &ControllerContext, kind: ControllerKind) -> RunningController {
    match kind {
        ControllerKind::Storage => start_storage(ctx),
        ControllerKind::PullSubscription => start_pull_subscriptions(ctx, kind, false),
        ControllerKind::Keda => start_pull_subscriptions(ctx, kind, true),
    }
}

fn start_storage(ctx: &ControllerContext) -> RunningController {
    let client = ctx.client.clone();
    let strategy = StorageStrategy::new(
        Arc::new(PubSubTopics::new(ctx.gcp.clone(), &ctx.config.pubsub_endpoint)),
        Arc::new(KubeStore::<PullSubscription>::new(client.clone())),
        ctx.operation_runner(),
        ctx.projects.clone(),
        ctx.config.in_progress_requeue(),
    );
    let reconciler: Arc<dyn Reconcile> = Arc::new(Reconciler::new(
        Arc::new(KubeStore::<CloudStorageSource>::new(client.clone())),
        ctx.sinks.clone(),
        Arc::new(KubeEventPublisher::new(
            client.clone(),
            "cloud-storage-source-controller",
        )),
        strategy,
        ctx.config.max_conflict_retries,
    ));

    let queue = ctx.queue("cloudstoragesource");
    let filter = accept_all::<CloudStorageSource>();
    let (owners, primary) = watch_primary(
        Api::<CloudStorageSource>::all(client.clone()),
        watcher::Config::default().any_semantic(),
        queue.clone(),
        filter.clone(),
        ctx.config.resync_period(),
    );
    let watches = vec![
        tokio::spawn(primary),
        tokio::spawn(fan_in_owned(
            Api::<Job>::all(client.clone()),
            watcher::Config::default().labels(LABEL_OWNER_UID),
            owners.clone(),
            queue.clone(),
            filter.clone(),
        )),
        tokio::spawn(fan_in_owned(
            Api::<PullSubscription>::all(client),
            watcher::Config::default(),
            owners,
            queue.clone(),
            filter,
        )),
    ];

    spawn_workers(ctx, ControllerKind::Storage, queue, reconciler, watches)
}

fn start_pull_subscriptions(
    ctx: &ControllerContext,
    kind: ControllerKind,
    keda: bool,
) -> RunningController {
    let client = ctx.client.clone();
    let strategy = PullSubscriptionStrategy::new(
        Arc::new(PubSubSubscriptions::new(ctx.gcp.clone(), &ctx.config.pubsub_endpoint)),
        Arc::new(KubeDataPlane::new(
            client.clone(),
            ctx.config.receive_adapter_image.clone(),
        )),
        ctx.sinks.clone(),
        ctx.projects.clone(),
    );
    let reporter = if keda {
        "keda-pull-subscription-controller"
    } else {
        "pull-subscription-controller"
    };
    let reconciler: Arc<dyn Reconcile> = Arc::new(Reconciler::new(
        Arc::new(KubeStore::<PullSubscription>::new(client.clone())),
        ctx.sinks.clone(),
        Arc::new(KubeEventPublisher::new(client.clone(), reporter)),
        strategy,
        ctx.config.max_conflict_retries,
    ));

    let queue = ctx.queue(if keda {
        "pullsubscription-keda"
    } else {
        "pullsubscription"
    });
    let filter: KeyFilter<PullSubscription> =
        Arc::new(move |ps: &PullSubscription| is_keda_class(ps) == keda);
    let (owners, primary) = watch_primary(
        Api::<PullSubscription>::all(client.clone()),
        watcher::Config::default().any_semantic(),
        queue.clone(),
        filter.clone(),
        ctx.config.resync_period(),
    );
    let adapters = watcher::Config::default().labels(LABEL_RECEIVE_ADAPTER);
    let mut watches = vec![
        tokio::spawn(primary),
        tokio::spawn(fan_in_owned(
            Api::<Deployment>::all(client.clone()),
            adapters.clone(),
            owners.clone(),
            queue.clone(),
            filter.clone(),
        )),
    ];
    // ScaledObjects exist only where KEDA is installed
    if keda {
        watches.push(tokio::spawn(fan_in_owned(
            Api::<ScaledObject>::all(client),
            adapters,
            owners,
            queue.clone(),
            filter,
        )));
    }

    spawn_workers(ctx, kind, queue, reconciler, watches)
}

fn spawn_workers(
    ctx: &ControllerContext,
    kind: ControllerKind,
    queue: WorkQueue,
    reconciler: Arc<dyn Reconcile>,
    watches: Vec<JoinHandle<()>>,
) -> RunningController {
    let workers = tokio::spawn(run_workers(
        queue.clone(),
        reconciler,
        ctx.config.max_concurrent_reconciliations,
    ));
    info!(controller = %kind, queue = queue.name(), "Controller started");
    RunningController {
        kind,
        queue,
        watches,
        workers,
    }
}
