//! # Runtime
//!
//! Kubernetes plumbing around the reconcilers.
//!
//! ## Module Structure
//!
//! - `initialization.rs` - TLS provider, tracing, metrics, HTTP server, client
//! - `controllers.rs` - Per-controller wiring of stores, strategies and queues
//! - `kube_store.rs` - `ObjectStore` over the API server
//! - `watch.rs` - Watches feeding record keys into a work queue
//! - `workers.rs` - Worker pool draining a work queue

pub mod controllers;
pub mod initialization;
pub mod kube_store;
pub mod watch;
pub mod workers;

pub use controllers::{ControllerContext, ControllerKind, RunningController};
pub use kube_store::KubeStore;
pub use watch::{accept_all, fan_in_owned, watch_primary, KeyFilter};
pub use workers::{process_next, run_workers};
