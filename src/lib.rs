//! Cloud Source Controller Library
//!
//! Controllers that keep external cloud resources (Pub/Sub topics and
//! subscriptions, storage bucket notifications) and in-cluster receive
//! adapters in step with declarative source records.
//!
//! ## Quick Start
//!
//! ```rust
//! use cloud_source_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod server;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
