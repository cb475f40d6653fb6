//! # Cloud Source Controller
//!
//! Kubernetes controllers that keep Pub/Sub topics, subscriptions and storage
//! bucket notifications in step with `CloudStorageSource` and
//! `PullSubscription` records, and run the receive adapters that deliver
//! events to their sinks.
//!
//! ## Controllers
//!
//! - `storage` - `CloudStorageSource`: topic, owned `PullSubscription`, bucket notification
//! - `pullsubscription` - `PullSubscription` with a plain receive adapter Deployment
//! - `keda` - `PullSubscription` annotated for KEDA autoscaling
//!
//! All three run by default.

use anyhow::Result;
use clap::Parser;
use cloud_source_controller::runtime::controllers::{self, ControllerContext, ControllerKind};
use cloud_source_controller::runtime::initialization::{initialize, shutdown_signal};
use std::time::Duration;
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "cloud-source-controller", version, about)]
struct Cli {
    /// Controllers to run
    #[arg(
        long,
        env = "CONTROLLERS",
        value_delimiter = ',',
        default_value = "storage,pullsubscription,keda"
    )]
    controllers: Vec<ControllerKind>,

    /// Port of the metrics and probe server (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let init = initialize(cli.metrics_port).await?;

    let mut enabled: Vec<ControllerKind> = Vec::new();
    for kind in cli.controllers {
        if !enabled.contains(&kind) {
            enabled.push(kind);
        }
    }
    let ctx = ControllerContext::new(init.client.clone(), init.config.clone())?;
    let running: Vec<_> = enabled
        .iter()
        .map(|kind| controllers::start(&ctx, *kind))
        .collect();

    init.server_state.set_ready(true);
    info!(controllers = ?enabled, "Controllers running");

    shutdown_signal().await;
    init.server_state.set_ready(false);
    info!("Shutting down");

    for controller in running {
        controller.shutdown(SHUTDOWN_GRACE).await;
    }
    init.server_handle.abort();

    info!("Controller stopped");
    Ok(())
}
