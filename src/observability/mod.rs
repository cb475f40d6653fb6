//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: tracing subscriber setup shared by the binaries

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use metrics::*;
