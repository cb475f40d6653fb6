//! # Notification Operation
//!
//! Execution unit for bucket notification operations run as Kubernetes
//! Jobs. Arguments come from the environment; the outcome is written as a
//! single JSON record to the termination log, where the controller reads it.
//!
//! The process exits non-zero when the operation fails so the Job's retry
//! budget applies.

use anyhow::{Context, Result};
use clap::Parser;
use cloud_source_controller::constants::DEFAULT_TERMINATION_LOG_PATH;
use cloud_source_controller::controller::operation::{
    execute, OperationAction, OperationArgs, OperationResult,
};
use cloud_source_controller::observability::logging;
use cloud_source_controller::provider::gcp::{
    GcpRestClient, MetadataClient, StorageNotifications, DEFAULT_METADATA_ENDPOINT,
    DEFAULT_STORAGE_ENDPOINT,
};
use cloud_source_controller::provider::ProjectResolver;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "notification-operation", version, about)]
struct Args {
    /// One of `create`, `delete` or `exists`
    #[arg(long, env = "ACTION", default_value = "")]
    action: String,

    /// Resolved from the metadata server when empty
    #[arg(long, env = "PROJECT_ID", default_value = "")]
    project_id: String,

    #[arg(long, env = "BUCKET", default_value = "")]
    bucket: String,

    #[arg(long, env = "PUBSUB_TOPIC_ID", default_value = "")]
    pubsub_topic_id: String,

    /// Colon separated storage event types
    #[arg(long, env = "EVENT_TYPES", default_value = "")]
    event_types: String,

    #[arg(long, env = "OBJECT_NAME_PREFIX", default_value = "")]
    object_name_prefix: String,

    /// JSON object of attributes added to every message
    #[arg(long, env = "CUSTOM_ATTRIBUTES", default_value = "")]
    custom_attributes: String,

    #[arg(long, env = "NOTIFICATION_ID", default_value = "")]
    notification_id: String,

    #[arg(long, env = "TERMINATION_LOG_PATH", default_value = DEFAULT_TERMINATION_LOG_PATH)]
    termination_log_path: PathBuf,

    #[arg(long, env = "STORAGE_ENDPOINT", default_value = DEFAULT_STORAGE_ENDPOINT)]
    storage_endpoint: String,

    #[arg(long, env = "GCP_METADATA_ENDPOINT", default_value = DEFAULT_METADATA_ENDPOINT)]
    metadata_endpoint: String,
}

impl Args {
    fn operation_args(&self, project: String) -> Result<OperationArgs, String> {
        let action: OperationAction = self.action.trim().parse()?;
        let custom_attributes = if self.custom_attributes.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&self.custom_attributes)
                .map_err(|e| format!("invalid CUSTOM_ATTRIBUTES: {e}"))?
        };
        Ok(OperationArgs {
            action,
            project,
            bucket: self.bucket.clone(),
            topic: self.pubsub_topic_id.clone(),
            event_types: self
                .event_types
                .split(':')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect(),
            object_name_prefix: Some(self.object_name_prefix.clone()).filter(|p| !p.is_empty()),
            custom_attributes,
            notification_id: Some(self.notification_id.clone()).filter(|id| !id.is_empty()),
            credentials: None,
        })
    }
}

async fn run(args: &Args) -> Result<OperationResult> {
    let client = Arc::new(
        GcpRestClient::new(args.metadata_endpoint.clone()).context("Failed to create GCP client")?,
    );

    let mut project = args.project_id.trim().to_string();
    if project.is_empty() {
        match MetadataClient::new(client.clone()).project_id().await {
            Ok(resolved) => project = resolved,
            Err(e) => {
                return Ok(OperationResult::failure(
                    format!("project is required but not set: {e}"),
                    "",
                ));
            }
        }
    }

    let operation = match args.operation_args(project.clone()) {
        Ok(operation) => operation,
        Err(e) => return Ok(OperationResult::failure(e, project)),
    };
    info!(
        action = %operation.action,
        project = %operation.project,
        bucket = %operation.bucket,
        "Running notification operation"
    );

    let provider = StorageNotifications::new(client, &args.storage_endpoint);
    Ok(execute(&provider, &operation).await)
}

fn write_result(path: &Path, result: &OperationResult) -> Result<()> {
    std::fs::write(path, result.encode())
        .with_context(|| format!("Failed to write result to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must happen before any TLS connection is made
    let _ = rustls::crypto::ring::default_provider().install_default();
    logging::init_tracing(None, std::env::var("LOG_FORMAT").ok().as_deref())?;

    let args = Args::parse();
    let result = match run(&args).await {
        Ok(result) => result,
        Err(e) => OperationResult::failure(format!("{e:#}"), args.project_id.clone()),
    };
    write_result(&args.termination_log_path, &result)?;

    if result.result {
        info!(external_id = %result.external_id, "Notification operation succeeded");
        Ok(())
    } else {
        error!(error = %result.error, "Notification operation failed");
        std::process::exit(1);
    }
}
