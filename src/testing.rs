//! # Test Support
//!
//! In-memory stand-ins for every seam the reconciler talks through. Unit
//! tests and the integration tests under `tests/` drive the real
//! [`crate::controller::reconciler::Reconciler`] with these.

use crate::controller::kinds::{DataPlane, ReceiveAdapterSpec};
use crate::controller::operation::{
    OperationAction, OperationArgs, OperationError, OperationHandle, OperationOwner,
    OperationRunner, OperationState,
};
use crate::controller::queue::ObjectKey;
use crate::controller::reconciler::{EventPublisher, ManagedResource, ObjectStore, StoreError};
use crate::controller::sink::{SinkError, SinkResolver};
use crate::crd::{Destination, PullSubscription};
use crate::provider::{
    ExternalResourceProvider, NotificationSpec, ProjectResolver, ProviderError, ProviderResult,
    SubscriptionSpec, TopicSpec,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> Option<Time> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(stamp)).ok()
}

/// Specs a [`FakeProvider`] can serve
pub trait FakeSpec: Send + Sync + 'static {
    /// Caller-chosen name, `None` when the provider assigns identifiers
    fn requested_name(&self) -> Option<&str>;
}

impl FakeSpec for TopicSpec {
    fn requested_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl FakeSpec for SubscriptionSpec {
    fn requested_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl FakeSpec for NotificationSpec {
    fn requested_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    resources: BTreeSet<String>,
    next_id: u64,
    create_calls: usize,
    exists_calls: usize,
    delete_calls: usize,
    deleted: Vec<String>,
    fail_create: Option<ProviderError>,
    fail_delete: Option<ProviderError>,
    fail_exists: Option<ProviderError>,
}

/// External resources kept in a set, with call counters and one-shot
/// failure injection
#[derive(Debug)]
pub struct FakeProvider<S> {
    kind: &'static str,
    state: Mutex<ProviderState>,
    _spec: PhantomData<fn(S)>,
}

impl<S: FakeSpec> FakeProvider<S> {
    pub fn named(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(ProviderState::default()),
            _spec: PhantomData,
        }
    }

    /// Pretend the resource already exists
    pub fn insert(&self, id: &str) {
        lock(&self.state).resources.insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.state).resources.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.state).resources.iter().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }

    pub fn exists_calls(&self) -> usize {
        lock(&self.state).exists_calls
    }

    pub fn delete_calls(&self) -> usize {
        lock(&self.state).delete_calls
    }

    /// Identifiers passed to `delete`, including failed calls
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    pub fn fail_next_create(&self, err: ProviderError) {
        lock(&self.state).fail_create = Some(err);
    }

    pub fn fail_next_delete(&self, err: ProviderError) {
        lock(&self.state).fail_delete = Some(err);
    }

    pub fn fail_next_exists(&self, err: ProviderError) {
        lock(&self.state).fail_exists = Some(err);
    }
}

#[async_trait]
impl<S: FakeSpec> ExternalResourceProvider for FakeProvider<S> {
    type Spec = S;

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn requested_id<'a>(&self, spec: &'a S) -> Option<&'a str> {
        spec.requested_name()
    }

    async fn exists(&self, _spec: &S, id: &str) -> ProviderResult<bool> {
        let mut state = lock(&self.state);
        state.exists_calls += 1;
        if let Some(err) = state.fail_exists.take() {
            return Err(err);
        }
        Ok(state.resources.contains(id))
    }

    async fn create(&self, spec: &S) -> ProviderResult<String> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        if let Some(err) = state.fail_create.take() {
            return Err(err);
        }
        let id = match spec.requested_name() {
            Some(name) if state.resources.contains(name) => {
                return Err(ProviderError::AlreadyExists(name.to_string()));
            }
            Some(name) => name.to_string(),
            None => {
                state.next_id += 1;
                state.next_id.to_string()
            }
        };
        state.resources.insert(id.clone());
        Ok(id)
    }

    async fn delete(&self, _spec: &S, id: &str) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        state.delete_calls += 1;
        state.deleted.push(id.to_string());
        if let Some(err) = state.fail_delete.take() {
            if matches!(err, ProviderError::NotFound(_)) {
                state.resources.remove(id);
            }
            return Err(err);
        }
        if state.resources.remove(id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(id.to_string()))
        }
    }
}

type WriteHook<K> = Box<dyn FnOnce(&mut K) + Send>;

struct StoreState<K> {
    objects: BTreeMap<ObjectKey, K>,
    version: u64,
    writes: usize,
    before_write: Option<WriteHook<K>>,
}

/// Records keyed by namespace and name, with resource versions bumped on
/// every write and stale writes rejected
pub struct FakeStore<K> {
    state: Mutex<StoreState<K>>,
}

impl<K: ManagedResource> std::fmt::Debug for FakeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FakeStore")
            .field("objects", &state.objects.len())
            .field("version", &state.version)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> Default for FakeStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ManagedResource> FakeStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                objects: BTreeMap::new(),
                version: 0,
                writes: 0,
                before_write: None,
            }),
        }
    }

    /// Seed a record, filling in uid, generation, creation time and a
    /// resource version
    pub fn insert(&self, obj: K) -> K {
        let mut state = lock(&self.state);
        let stored = Self::admit(&mut state, obj);
        state
            .objects
            .insert(ObjectKey::from_resource(&stored), stored.clone());
        stored
    }

    /// Current copy of a record
    pub fn current(&self, key: &ObjectKey) -> Option<K> {
        lock(&self.state).objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        lock(&self.state).objects.contains_key(key)
    }

    /// Successful writes so far, excluding `insert`
    pub fn write_count(&self) -> usize {
        lock(&self.state).writes
    }

    /// Mutate the stored record right before the next write lands, as a
    /// concurrent writer would
    pub fn inject_before_next_write(&self, hook: impl FnOnce(&mut K) + Send + 'static) {
        lock(&self.state).before_write = Some(Box::new(hook));
    }

    /// Set the deletion timestamp, as the API server does for records
    /// holding finalizers
    pub fn mark_deleting(&self, key: &ObjectKey) {
        let mut state = lock(&self.state);
        state.version += 1;
        let version = state.version.to_string();
        if let Some(obj) = state.objects.get_mut(key) {
            obj.meta_mut().deletion_timestamp = now();
            obj.meta_mut().resource_version = Some(version);
        }
    }

    fn admit(state: &mut StoreState<K>, mut obj: K) -> K {
        state.version += 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        meta.generation.get_or_insert(1);
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = now();
        }
        obj
    }

    /// Run the pending hook, check `obj` against the stored version, then
    /// apply `change` and bump the version
    fn write(&self, obj: &K, change: impl FnOnce(&mut K)) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(obj);
        let mut state = lock(&self.state);
        if let Some(hook) = state.before_write.take() {
            state.version += 1;
            let version = state.version.to_string();
            if let Some(stored) = state.objects.get_mut(&key) {
                hook(stored);
                stored.meta_mut().resource_version = Some(version);
            }
        }

        state.version += 1;
        let version = state.version.to_string();
        let stored = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(expected) = obj.meta().resource_version.as_deref() {
            if stored.meta().resource_version.as_deref() != Some(expected) {
                return Err(StoreError::Conflict(format!(
                    "{key} is at {}, write carried {expected}",
                    stored.meta().resource_version.as_deref().unwrap_or("<none>")
                )));
            }
        }
        change(stored);
        stored.meta_mut().resource_version = Some(version);
        let written = stored.clone();

        let released = written.meta().deletion_timestamp.is_some()
            && written.meta().finalizers.as_ref().is_none_or(Vec::is_empty);
        if released {
            state.objects.remove(&key);
        }
        state.writes += 1;
        Ok(written)
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectStore<K> for FakeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        lock(&self.state)
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let status = obj.status().cloned().unwrap_or_default();
        self.write(obj, |stored| *stored.status_mut() = status)
    }

    async fn patch_finalizers(&self, obj: &K) -> Result<K, StoreError> {
        let finalizers = obj.meta().finalizers.clone();
        self.write(obj, |stored| stored.meta_mut().finalizers = finalizers)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(obj);
        let mut state = lock(&self.state);
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let stored = Self::admit(&mut state, obj.clone());
        state.writes += 1;
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.write(obj, |stored| {
            let status = stored.status().cloned();
            let generation = stored.meta().generation.unwrap_or(1) + 1;
            let mut replacement = obj.clone();
            if let Some(status) = status {
                *replacement.status_mut() = status;
            }
            replacement.meta_mut().generation = Some(generation);
            replacement.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
            *stored = replacement;
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let holds_finalizers = {
            let state = lock(&self.state);
            let obj = state
                .objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            obj.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty())
        };
        if holds_finalizers {
            self.mark_deleting(key);
        } else {
            lock(&self.state).objects.remove(key);
        }
        Ok(())
    }
}

/// Resolves every destination to the same scripted outcome, except absolute
/// URIs which resolve to themselves
#[derive(Debug)]
pub struct FakeSinkResolver {
    outcome: Mutex<Result<String, SinkError>>,
}

impl FakeSinkResolver {
    pub fn resolving(uri: &str) -> Self {
        Self {
            outcome: Mutex::new(Ok(uri.to_string())),
        }
    }

    pub fn failing(err: SinkError) -> Self {
        Self {
            outcome: Mutex::new(Err(err)),
        }
    }

    pub fn set(&self, outcome: Result<String, SinkError>) {
        *lock(&self.outcome) = outcome;
    }
}

#[async_trait]
impl SinkResolver for FakeSinkResolver {
    async fn resolve(&self, destination: &Destination, _namespace: &str) -> Result<String, SinkError> {
        if destination.reference.is_none() {
            if let Some(uri) = destination.uri.as_deref() {
                return Ok(uri.to_string());
            }
        }
        lock(&self.outcome).clone()
    }
}

/// Project resolver with a fixed answer
#[derive(Debug, Clone)]
pub struct StaticProject(Option<String>);

impl StaticProject {
    pub fn new(project: &str) -> Self {
        Self(Some(project.to_string()))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ProjectResolver for StaticProject {
    async fn project_id(&self) -> ProviderResult<String> {
        self.0
            .clone()
            .ok_or_else(|| ProviderError::Transient("metadata server unreachable".to_string()))
    }
}

/// Keeps every published event
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingEvents {
    /// `(type, reason)` pairs in publish order
    pub fn events(&self) -> Vec<(String, String)> {
        lock(&self.events).clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        _note: Option<String>,
    ) {
        let type_ = match type_ {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        lock(&self.events).push((type_.to_string(), reason.to_string()));
    }
}

/// Data plane that records what it was asked to run
#[derive(Debug)]
pub struct FakeDataPlane {
    ready: Mutex<bool>,
    applied: Mutex<Vec<ReceiveAdapterSpec>>,
    fail_next: Mutex<Option<StoreError>>,
}

impl FakeDataPlane {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Mutex::new(ready),
            applied: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        *lock(&self.ready) = ready;
    }

    pub fn applied(&self) -> Vec<ReceiveAdapterSpec> {
        lock(&self.applied).clone()
    }

    pub fn fail_next(&self, err: StoreError) {
        *lock(&self.fail_next) = Some(err);
    }
}

#[async_trait]
impl DataPlane for FakeDataPlane {
    async fn apply(
        &self,
        _owner: &PullSubscription,
        adapter: &ReceiveAdapterSpec,
    ) -> Result<bool, StoreError> {
        if let Some(err) = lock(&self.fail_next).take() {
            return Err(err);
        }
        lock(&self.applied).push(adapter.clone());
        Ok(*lock(&self.ready))
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    scripts: HashMap<OperationAction, VecDeque<OperationState>>,
    last: HashMap<OperationAction, OperationState>,
    submitted: Vec<OperationArgs>,
    forgotten: Vec<OperationHandle>,
    /// Actions submitted and not forgotten since
    live: HashSet<OperationAction>,
}

/// Operation runner whose poll results are scripted per action.
///
/// Each poll takes the next scripted state; once the script runs out the
/// last state repeats.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: OperationAction, state: OperationState) {
        lock(&self.state)
            .scripts
            .entry(action)
            .or_default()
            .push_back(state);
    }

    pub fn submitted(&self) -> Vec<OperationArgs> {
        lock(&self.state).submitted.clone()
    }

    pub fn forgotten(&self) -> Vec<OperationHandle> {
        lock(&self.state).forgotten.clone()
    }
}

#[async_trait]
impl OperationRunner for ScriptedRunner {
    async fn submit(
        &self,
        owner: &OperationOwner,
        args: &OperationArgs,
    ) -> Result<OperationHandle, OperationError> {
        let mut state = lock(&self.state);
        state.submitted.push(args.clone());
        state.live.insert(args.action);
        Ok(OperationHandle::for_owner(owner, args.action))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState, OperationError> {
        let mut state = lock(&self.state);
        let next = state
            .scripts
            .get_mut(&handle.action)
            .and_then(VecDeque::pop_front);
        match next {
            Some(next) => {
                state.last.insert(handle.action, next.clone());
                Ok(next)
            }
            None => Ok(state
                .last
                .get(&handle.action)
                .cloned()
                .unwrap_or(OperationState::Failed(None))),
        }
    }

    async fn find(
        &self,
        owner: &OperationOwner,
        action: OperationAction,
    ) -> Result<Option<OperationState>, OperationError> {
        if !lock(&self.state).live.contains(&action) {
            return Ok(None);
        }
        self.poll(&OperationHandle::for_owner(owner, action))
            .await
            .map(Some)
    }

    async fn forget(&self, handle: &OperationHandle) -> Result<(), OperationError> {
        let mut state = lock(&self.state);
        state.forgotten.push(handle.clone());
        state.live.remove(&handle.action);
        Ok(())
    }
}
