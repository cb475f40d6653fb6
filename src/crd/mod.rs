//! # Custom Resource Definitions
//!
//! CRD types served by the controllers.
//!
//! ## Module Structure
//!
//! - `storage.rs` - CloudStorageSource (bucket notifications)
//! - `pull_subscription.rs` - PullSubscription (subscription + receive adapter)
//! - `scaled_object.rs` - KEDA ScaledObject written for KEDA-class subscriptions
//! - `destination.rs` - Sink references
//! - `status.rs` - Conditions and the status block shared by every source

mod destination;
mod pull_subscription;
mod scaled_object;
mod status;
mod storage;

pub use destination::{Destination, KReference, SecretKeyRef};
pub use pull_subscription::{PullSubscription, PullSubscriptionSpec, PullSubscriptionStatus};
pub use scaled_object::{ScaleTargetRef, ScaleTrigger, ScaledObject, ScaledObjectSpec};
pub use status::{Condition, ConditionStatus, Conditions, SourceStatus};
pub use storage::{CloudStorageSource, CloudStorageSourceSpec, CloudStorageSourceStatus};
