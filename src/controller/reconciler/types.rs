//! Resource capabilities the generic reconcile loop relies on.

use crate::crd::{
    CloudStorageSource, CloudStorageSourceStatus, Destination, PullSubscription,
    PullSubscriptionStatus, SourceStatus,
};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;

/// A record reconciled by [`super::Reconciler`]
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Status: Clone + Default + PartialEq + Debug + Serialize + Send + Sync;

    fn status(&self) -> Option<&Self::Status>;

    /// Status block, created empty if absent
    fn status_mut(&mut self) -> &mut Self::Status;

    fn source_status(&self) -> Option<&SourceStatus>;

    fn source_status_mut(&mut self) -> &mut SourceStatus;

    /// Where the record delivers events
    fn sink(&self) -> &Destination;
}

impl ManagedResource for CloudStorageSource {
    type Status = CloudStorageSourceStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }

    fn source_status(&self) -> Option<&SourceStatus> {
        self.status.as_ref().map(|s| &s.source)
    }

    fn source_status_mut(&mut self) -> &mut SourceStatus {
        &mut self.status_mut().source
    }

    fn sink(&self) -> &Destination {
        &self.spec.sink
    }
}

impl ManagedResource for PullSubscription {
    type Status = PullSubscriptionStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }

    fn source_status(&self) -> Option<&SourceStatus> {
        self.status.as_ref().map(|s| &s.source)
    }

    fn source_status_mut(&mut self) -> &mut SourceStatus {
        &mut self.status_mut().source
    }

    fn sink(&self) -> &Destination {
        &self.spec.sink
    }
}

/// What the queue should do with a key after a successful pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after `duration` even without a change
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Wait for the next change notification or resync
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }
}

/// Outcome of a cleanup step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Every external resource is confirmed gone
    Finished,
    /// Deletion is still in progress; the finalizer must stay
    Pending(Action),
}
