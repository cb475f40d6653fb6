//! Persistence within one reconcile pass.
//!
//! A pass remembers the last record it saw from the store (the baseline).
//! Each write is skipped when nothing differs from the baseline, re-reads
//! the freshest record, and refuses to overwrite a record that changed
//! since the baseline was taken.

use super::store::{ObjectStore, StoreError};
use super::types::ManagedResource;
use crate::controller::queue::ObjectKey;
use tracing::debug;

pub struct Pass<'a, K: ManagedResource> {
    store: &'a dyn ObjectStore<K>,
    baseline: K,
    writes: u32,
}

impl<'a, K: ManagedResource> Pass<'a, K> {
    pub fn new(store: &'a dyn ObjectStore<K>, baseline: K) -> Self {
        Self {
            store,
            baseline,
            writes: 0,
        }
    }

    /// Last record read from or written to the store
    pub fn baseline(&self) -> &K {
        &self.baseline
    }

    /// Number of writes this pass performed
    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn store(&self) -> &'a dyn ObjectStore<K> {
        self.store
    }

    /// Write the status of `desired` if it differs from the baseline
    pub async fn persist_status(&mut self, desired: &K) -> Result<bool, StoreError> {
        if desired.status() == self.baseline.status() {
            return Ok(false);
        }
        let fresh = self.fresh().await?;
        if fresh.status() == desired.status() {
            self.baseline = fresh;
            return Ok(false);
        }
        self.check_unchanged(&fresh)?;

        let mut write = desired.clone();
        write.meta_mut().resource_version = fresh.meta().resource_version.clone();
        let written = self.store.update_status(&write).await?;
        debug!(key = %ObjectKey::from_resource(desired), "Persisted status");
        self.record_write(written);
        Ok(true)
    }

    /// Write the finalizers of `desired` if they differ from the baseline
    pub async fn persist_finalizers(&mut self, desired: &K) -> Result<bool, StoreError> {
        if desired.meta().finalizers == self.baseline.meta().finalizers {
            return Ok(false);
        }
        let fresh = self.fresh().await?;
        if fresh.meta().finalizers == desired.meta().finalizers {
            self.baseline = fresh;
            return Ok(false);
        }
        self.check_unchanged(&fresh)?;

        let mut write = desired.clone();
        write.meta_mut().resource_version = fresh.meta().resource_version.clone();
        let written = self.store.patch_finalizers(&write).await?;
        debug!(key = %ObjectKey::from_resource(desired), "Persisted finalizers");
        self.record_write(written);
        Ok(true)
    }

    /// Persist finalizers, then status.
    ///
    /// Used before touching an external system so that the identifier about
    /// to be used, and the finalizer guarding it, survive a crash.
    pub async fn checkpoint(&mut self, desired: &K) -> Result<(), StoreError> {
        self.persist_finalizers(desired).await?;
        self.persist_status(desired).await?;
        Ok(())
    }

    async fn fresh(&self) -> Result<K, StoreError> {
        self.store.get(&ObjectKey::from_resource(&self.baseline)).await
    }

    fn check_unchanged(&self, fresh: &K) -> Result<(), StoreError> {
        let seen = self.baseline.meta().resource_version.as_deref();
        let current = fresh.meta().resource_version.as_deref();
        if seen == current {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "{} changed from resource version {} to {}",
                ObjectKey::from_resource(fresh),
                seen.unwrap_or("<none>"),
                current.unwrap_or("<none>")
            )))
        }
    }

    fn record_write(&mut self, written: K) {
        self.writes += 1;
        self.baseline = written;
    }
}
