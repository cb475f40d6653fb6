//! # Metrics
//!
//! Prometheus metrics for monitoring the controllers.
//!
//! ## Metrics Exposed
//!
//! - `cloud_source_reconciliations_total` - Reconcile passes by kind
//! - `cloud_source_reconciliation_errors_total` - Failed passes by kind and error class
//! - `cloud_source_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `cloud_source_queue_depth` - Keys waiting in the work queue
//! - `cloud_source_queue_adds_total` - Keys added to the work queue
//! - `cloud_source_requeues_total` - Requeues by reason
//! - `cloud_source_provider_operations_total` - Provider calls by service and operation
//! - `cloud_source_provider_operation_duration_seconds` - Duration of provider calls
//! - `cloud_source_provider_errors_total` - Provider errors by error class
//! - `cloud_source_operation_jobs_submitted_total` - Operation jobs submitted by action
//! - `cloud_source_operation_jobs_completed_total` - Operation jobs finished by outcome
//! - `cloud_source_ready_latency_seconds` - Time from creation to first Ready

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_reconciliations_total",
            "Total number of reconcile passes",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_reconciliation_errors_total",
            "Total number of failed reconcile passes by error class",
        ),
        &["kind", "class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cloud_source_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new("cloud_source_queue_depth", "Keys waiting in the work queue"),
        &["queue"],
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static QUEUE_ADDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_queue_adds_total",
            "Total number of keys added to the work queue",
        ),
        &["queue"],
    )
    .expect("Failed to create QUEUE_ADDS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("cloud_source_requeues_total", "Total number of requeues by reason"),
        &["queue", "reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_provider_operations_total",
            "Total number of provider calls by service and operation",
        ),
        &["service", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cloud_source_provider_operation_duration_seconds",
            "Duration of provider calls in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["service", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

static PROVIDER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_provider_errors_total",
            "Total number of provider errors by class",
        ),
        &["service", "class"],
    )
    .expect("Failed to create PROVIDER_ERRORS_TOTAL metric - this should never happen")
});

static OPERATION_JOBS_SUBMITTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_operation_jobs_submitted_total",
            "Total number of operation jobs submitted",
        ),
        &["action"],
    )
    .expect("Failed to create OPERATION_JOBS_SUBMITTED_TOTAL metric - this should never happen")
});

static OPERATION_JOBS_COMPLETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_source_operation_jobs_completed_total",
            "Total number of operation jobs observed finished",
        ),
        &["action", "outcome"],
    )
    .expect("Failed to create OPERATION_JOBS_COMPLETED_TOTAL metric - this should never happen")
});

static READY_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cloud_source_ready_latency_seconds",
            "Seconds between creation and the first Ready observation",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["kind"],
    )
    .expect("Failed to create READY_LATENCY metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(QUEUE_ADDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_JOBS_SUBMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_JOBS_COMPLETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READY_LATENCY.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, class: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, class])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    #[allow(clippy::cast_possible_wrap, reason = "Queue depth never exceeds i64::MAX")]
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as i64);
}

pub fn increment_queue_adds(queue: &str) {
    QUEUE_ADDS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn increment_requeues(queue: &str, reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[queue, reason]).inc();
}

pub fn record_provider_operation(service: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[service, operation])
        .inc();
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[service, operation])
        .observe(duration);
}

pub fn increment_provider_errors(service: &str, class: &str) {
    PROVIDER_ERRORS_TOTAL
        .with_label_values(&[service, class])
        .inc();
}

pub fn increment_operation_jobs_submitted(action: &str) {
    OPERATION_JOBS_SUBMITTED_TOTAL
        .with_label_values(&[action])
        .inc();
}

pub fn increment_operation_jobs_completed(action: &str, outcome: &str) {
    OPERATION_JOBS_COMPLETED_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

pub fn observe_ready_latency(kind: &str, seconds: f64) {
    READY_LATENCY.with_label_values(&[kind]).observe(seconds);
}

/// Encode every registered metric in the prometheus text format
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
        increment_reconciliations("CloudStorageSource");
        let text = gather_text().unwrap();
        assert!(text.contains("cloud_source_reconciliations_total"));
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["Test"]).get();
        increment_reconciliations("Test");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["Test"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_requeues_are_labelled_by_reason() {
        increment_requeues("test", "conflict");
        increment_requeues("test", "conflict");
        assert!(REQUEUES_TOTAL.with_label_values(&["test", "conflict"]).get() >= 2);
    }

    #[test]
    fn test_queue_depth_gauge() {
        set_queue_depth("depth-test", 4);
        assert_eq!(QUEUE_DEPTH.with_label_values(&["depth-test"]).get(), 4);
    }
}
