//! Object store seam: reads and optimistic-concurrency writes of records.

use crate::controller::queue::ObjectKey;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("resource version conflict on {0}")]
    Conflict(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("object store error: {0}")]
    Other(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(api_err.message),
            kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                Self::AlreadyExists(api_err.message)
            }
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(api_err.message),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Access to records of kind `K`.
///
/// Writes carry the record's resource version and fail with
/// [`StoreError::Conflict`] when it is stale.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// Replace the status subresource
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the finalizer list
    async fn patch_finalizers(&self, obj: &K) -> Result<K, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the spec
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}
