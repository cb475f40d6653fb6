//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use cloud_source_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Provider seams
pub use crate::provider::{
    ExternalResourceProvider, NotificationSpec, ProjectResolver, ProviderError, ProviderResult,
    SubscriptionSpec, TopicSpec,
};

// Reconciler types
pub use crate::controller::error::{ReconcileError, ReconcileResult};
pub use crate::controller::kinds::{PullSubscriptionStrategy, StorageStrategy};
pub use crate::controller::queue::{ObjectKey, WorkQueue};
pub use crate::controller::reconciler::{
    Action, Cleanup, ManagedResource, ObjectStore, Reconcile, ReconcileStrategy, Reconciler,
    StoreError,
};

// Config types
pub use crate::config::ControllerConfig;
