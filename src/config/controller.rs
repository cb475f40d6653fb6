//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Exponential backoff starting value (milliseconds)
    /// Initial delay before retrying after an error
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    /// Maximum delay between retries
    pub backoff_max_ms: u64,
    /// Period between full resync sweeps (seconds)
    pub resync_period_secs: u64,
    /// Requeue delay while out-of-process work is still running (seconds)
    pub in_progress_requeue_secs: u64,
    /// Maximum concurrent reconciliations per controller
    pub max_concurrent_reconciliations: usize,
    /// Conflict retries inside a single reconcile before handing back to the queue
    pub max_conflict_retries: u32,
    /// Namespace the controller runs in
    pub controller_namespace: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Receive adapter image for PullSubscription data planes
    pub receive_adapter_image: String,
    /// Image of the notification operation agent.
    /// When unset, storage notifications are managed in-process.
    pub notification_operation_image: Option<String>,
    /// Secret holding credentials mounted into operation jobs
    pub notification_operation_secret: Option<String>,
    /// Override for the Pub/Sub REST endpoint
    pub pubsub_endpoint: String,
    /// Override for the Cloud Storage REST endpoint
    pub storage_endpoint: String,
    /// Override for the GCP metadata server
    pub metadata_endpoint: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        use crate::provider::gcp::{
            DEFAULT_METADATA_ENDPOINT, DEFAULT_PUBSUB_ENDPOINT, DEFAULT_STORAGE_ENDPOINT,
        };
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            in_progress_requeue_secs: DEFAULT_IN_PROGRESS_REQUEUE_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            controller_namespace: "cloud-sources-system".to_string(),
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            receive_adapter_image: String::new(),
            notification_operation_image: None,
            notification_operation_secret: None,
            pubsub_endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", defaults.metrics_port),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", defaults.backoff_max_ms),
            resync_period_secs: env_var_or_default(
                "RESYNC_PERIOD_SECS",
                defaults.resync_period_secs,
            ),
            in_progress_requeue_secs: env_var_or_default(
                "IN_PROGRESS_REQUEUE_SECS",
                defaults.in_progress_requeue_secs,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            max_conflict_retries: env_var_or_default(
                "MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            ),
            controller_namespace: env_var_or_default_str(
                "POD_NAMESPACE",
                &defaults.controller_namespace,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", &defaults.log_level),
            log_format: env_var_or_default_str("LOG_FORMAT", &defaults.log_format),
            receive_adapter_image: env_var_or_default_str("PUBSUB_RA_IMAGE", ""),
            notification_operation_image: env_var_opt("NOTIFICATION_OPERATION_IMAGE"),
            notification_operation_secret: env_var_opt("NOTIFICATION_OPERATION_SECRET"),
            pubsub_endpoint: env_var_or_default_str("PUBSUB_ENDPOINT", &defaults.pubsub_endpoint),
            storage_endpoint: env_var_or_default_str(
                "STORAGE_ENDPOINT",
                &defaults.storage_endpoint,
            ),
            metadata_endpoint: env_var_or_default_str(
                "GCP_METADATA_ENDPOINT",
                &defaults.metadata_endpoint,
            ),
        }
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get resync period
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Get the requeue delay used while work is in progress
    pub fn in_progress_requeue(&self) -> Duration {
        Duration::from_secs(self.in_progress_requeue_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an optional, non-empty environment variable
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
