//! # Reconcile Errors
//!
//! Every failure a reconcile pass can return, already classified. The worker
//! pool picks a requeue policy from the class alone.

use crate::controller::operation::OperationError;
use crate::controller::reconciler::StoreError;
use crate::controller::sink::SinkError;
use crate::provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The record or external resource is absent
    #[error("not found: {0}")]
    NotFound(String),
    /// Network, quota or rate limiting; retried with backoff
    #[error("transient error: {0}")]
    Transient(String),
    /// Optimistic concurrency collision; retried immediately
    #[error("conflict: {0}")]
    Conflict(String),
    /// A referenced object cannot be resolved yet
    #[error("unresolved: {0}")]
    Unresolved(String),
    /// Malformed spec or rejected request
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl ReconcileError {
    /// Label used for metrics and logs
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Conflict(_) => "conflict",
            Self::Unresolved(_) => "unresolved",
            Self::Permanent(_) => "permanent",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<ProviderError> for ReconcileError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(m) => Self::NotFound(m),
            // Only reaches here when the provider could not name the resource
            ProviderError::AlreadyExists(m) => Self::Transient(format!("{m} already exists")),
            ProviderError::Transient(m) => Self::Transient(m),
            ProviderError::Permanent(m) => Self::Permanent(m),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => Self::NotFound(m),
            StoreError::Conflict(m) => Self::Conflict(m),
            StoreError::AlreadyExists(m) => Self::Transient(format!("{m} already exists")),
            StoreError::Other(m) => Self::Transient(m),
        }
    }
}

impl From<SinkError> for ReconcileError {
    fn from(err: SinkError) -> Self {
        Self::Unresolved(err.to_string())
    }
}

impl From<OperationError> for ReconcileError {
    fn from(err: OperationError) -> Self {
        Self::Transient(err.to_string())
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
