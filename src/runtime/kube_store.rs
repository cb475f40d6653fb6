//! `ObjectStore` backed by the Kubernetes API.
//!
//! Status and finalizer writes are merge patches that carry the record's
//! `resourceVersion`, so the API server rejects them with a 409 when the
//! record moved on.

use crate::controller::queue::ObjectKey;
use crate::controller::reconciler::{ManagedResource, ObjectStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::marker::PhantomData;

pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K> KubeStore<K>
where
    K: ManagedResource + Resource<Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        self.api(obj.namespace().as_deref())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: ManagedResource + Resource<Scope = NamespaceResourceScope>,
{
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        Ok(self.api(key.namespace.as_deref()).get(&key.name).await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": obj.status(),
        });
        Ok(self
            .api_for(obj)
            .patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn patch_finalizers(&self, obj: &K) -> Result<K, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": obj.finalizers(),
            },
        });
        Ok(self
            .api_for(obj)
            .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        Ok(self.api_for(obj).create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        Ok(self
            .api_for(obj)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.api(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}
