//! # Constants
//!
//! Shared constants used throughout the controllers.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group for every source kind served by this crate
pub const API_GROUP: &str = "sources.cloud-events.dev";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default period between full resync sweeps (seconds)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 600;

/// Requeue delay while an operation job is still running (seconds)
pub const DEFAULT_IN_PROGRESS_REQUEUE_SECS: u64 = 5;

/// Default number of worker routines per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// How many times one reconcile pass is re-run after a persist conflict
/// before the key is handed back to the queue
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Prefix of generated topic names
pub const GENERATED_TOPIC_PREFIX: &str = "gcs-";

/// Prefix of subscription names derived from a PullSubscription UID
pub const SUBSCRIPTION_NAME_PREFIX: &str = "cre-pull-";

/// Custom attribute stamped onto every storage notification
pub const CE_TYPE_ATTRIBUTE: &str = "ce-type";

/// Value of [`CE_TYPE_ATTRIBUTE`]
pub const CE_TYPE_STORAGE: &str = "google.gcs";

/// Annotation selecting the autoscaling class of a PullSubscription
pub const AUTOSCALING_CLASS_ANNOTATION: &str = "autoscaling.knative.dev/class";

/// Autoscaling class handled by the KEDA controller
pub const KEDA_AUTOSCALING_CLASS: &str = "keda.autoscaling.knative.dev";

/// Annotations tuning the generated ScaledObject
pub const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/minScale";
pub const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/maxScale";
pub const KEDA_POLLING_INTERVAL_ANNOTATION: &str = "keda.autoscaling.knative.dev/pollingInterval";
pub const KEDA_COOLDOWN_PERIOD_ANNOTATION: &str = "keda.autoscaling.knative.dev/cooldownPeriod";
pub const KEDA_SUBSCRIPTION_SIZE_ANNOTATION: &str = "keda.autoscaling.knative.dev/subscriptionSize";

/// ScaledObject defaults used when the annotations above are absent
pub const DEFAULT_MIN_SCALE: i32 = 0;
pub const DEFAULT_MAX_SCALE: i32 = 1;
pub const DEFAULT_KEDA_POLLING_INTERVAL: i32 = 15;
pub const DEFAULT_KEDA_COOLDOWN_PERIOD: i32 = 120;
pub const DEFAULT_KEDA_SUBSCRIPTION_SIZE: i32 = 100;

/// Bounded retry count of an operation job's pod
pub const OPERATION_JOB_BACKOFF_LIMIT: i32 = 3;

/// Where the operation agent writes its result record
pub const DEFAULT_TERMINATION_LOG_PATH: &str = "/dev/termination-log";

/// Mount path of the operation job credentials secret
pub const OPERATION_CREDENTIALS_MOUNT: &str = "/var/secrets/google";

/// Labels stamped onto objects created on behalf of a source
pub const LABEL_ACTION: &str = "sources.cloud-events.dev/action";
pub const LABEL_OWNER_UID: &str = "sources.cloud-events.dev/owner-uid";
pub const LABEL_RECEIVE_ADAPTER: &str = "sources.cloud-events.dev/receive-adapter";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "cloud-source-controller";
