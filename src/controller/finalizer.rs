//! # Finalizers
//!
//! Set operations on the in-memory copy of a record. Persisting the result is
//! the reconcile loop's job.

use kube::{Resource, ResourceExt};

/// Add `name` to the record's finalizers. Returns whether the set changed.
pub fn ensure_present<K: Resource>(obj: &mut K, name: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    if finalizers.iter().any(|f| f == name) {
        return false;
    }
    finalizers.push(name.to_string());
    finalizers.sort();
    finalizers.dedup();
    true
}

/// Remove `name` from the record's finalizers. Returns whether the set changed.
pub fn ensure_absent<K: Resource>(obj: &mut K, name: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != name);
    before != finalizers.len()
}

pub fn has<K: Resource>(obj: &K, name: &str) -> bool {
    obj.finalizers().iter().any(|f| f == name)
}

/// Whether the record carries a deletion timestamp
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
