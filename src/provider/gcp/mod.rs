//! # GCP Providers
//!
//! REST implementations of the provider capabilities against Pub/Sub, Cloud
//! Storage and the metadata server.
//!
//! ## Module Structure
//!
//! - `rest.rs` - Shared HTTP client: token cache, error classification, metrics
//! - `metadata.rs` - Project id lookup from the metadata server
//! - `pubsub.rs` - Topics and subscriptions
//! - `storage.rs` - Bucket notifications

mod metadata;
mod pubsub;
mod rest;
mod storage;

pub use metadata::MetadataClient;
pub use pubsub::{PubSubSubscriptions, PubSubTopics};
pub use rest::GcpRestClient;
pub use storage::StorageNotifications;

/// Pub/Sub REST endpoint
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Cloud Storage JSON API endpoint
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Metadata server reachable from GKE and GCE workloads
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";
