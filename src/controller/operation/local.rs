//! In-process operation runner.
//!
//! Every submit runs the operation to completion against the provider, so
//! each reconcile pass re-checks the external resource. The outcome is kept
//! until it is polled and forgotten.

use super::{
    execute, OperationAction, OperationArgs, OperationError, OperationHandle, OperationOwner,
    OperationResult, OperationRunner, OperationState,
};
use crate::observability::metrics;
use crate::provider::{ExternalResourceProvider, NotificationSpec};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type NotificationProvider = dyn ExternalResourceProvider<Spec = NotificationSpec>;

pub struct LocalRunner {
    provider: Arc<NotificationProvider>,
    results: Mutex<HashMap<OperationHandle, OperationResult>>,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("provider", &self.provider.kind())
            .finish_non_exhaustive()
    }
}

impl LocalRunner {
    pub fn new(provider: Arc<NotificationProvider>) -> Self {
        Self {
            provider,
            results: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OperationRunner for LocalRunner {
    async fn submit(
        &self,
        owner: &OperationOwner,
        args: &OperationArgs,
    ) -> Result<OperationHandle, OperationError> {
        let handle = OperationHandle::for_owner(owner, args.action);
        metrics::increment_operation_jobs_submitted(args.action.as_str());
        let result = execute(self.provider.as_ref(), args).await;
        self.results.lock().await.insert(handle.clone(), result);
        Ok(handle)
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState, OperationError> {
        let state = match self.results.lock().await.get(handle) {
            Some(result) if result.result => OperationState::Succeeded(result.clone()),
            Some(result) => OperationState::Failed(Some(result.clone())),
            None => OperationState::Failed(None),
        };
        let outcome = if matches!(state, OperationState::Succeeded(_)) {
            "succeeded"
        } else {
            "failed"
        };
        metrics::increment_operation_jobs_completed(handle.action.as_str(), outcome);
        Ok(state)
    }

    async fn find(
        &self,
        owner: &OperationOwner,
        action: OperationAction,
    ) -> Result<Option<OperationState>, OperationError> {
        let handle = OperationHandle::for_owner(owner, action);
        if !self.results.lock().await.contains_key(&handle) {
            return Ok(None);
        }
        self.poll(&handle).await.map(Some)
    }

    async fn forget(&self, handle: &OperationHandle) -> Result<(), OperationError> {
        self.results.lock().await.remove(handle);
        Ok(())
    }
}
