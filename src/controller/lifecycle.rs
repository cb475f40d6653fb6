//! # External Resource Lifecycle
//!
//! Idempotent get-or-create and get-or-delete on top of an
//! [`ExternalResourceProvider`]. The identifier recorded in status is only a
//! cached pointer: it is re-validated with an existence check before it is
//! trusted or deleted.

use crate::constants::{GENERATED_TOPIC_PREFIX, SUBSCRIPTION_NAME_PREFIX};
use crate::provider::{ExternalResourceProvider, ProviderError, ProviderResult};
use tracing::{debug, info};

/// Outcome of [`get_or_create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    /// The recorded identifier still exists
    Existing(String),
    /// A new resource was created
    Created(String),
    /// Create reported AlreadyExists under the requested name; someone else
    /// may own it
    Adopted(String),
}

impl Ensured {
    pub fn id(&self) -> &str {
        match self {
            Self::Existing(id) | Self::Created(id) | Self::Adopted(id) => id,
        }
    }

    pub fn into_id(self) -> String {
        match self {
            Self::Existing(id) | Self::Created(id) | Self::Adopted(id) => id,
        }
    }
}

/// Outcome of [`get_or_delete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Nothing was ever recorded
    NeverCreated,
    /// The recorded resource was already gone
    AlreadyGone,
    Deleted,
}

fn recorded_id(recorded: Option<&str>) -> Option<&str> {
    recorded.map(str::trim).filter(|id| !id.is_empty())
}

/// Return the recorded resource if it still exists, otherwise create it.
///
/// The caller must persist the returned identifier before treating the step
/// as complete.
pub async fn get_or_create<P>(
    provider: &P,
    spec: &P::Spec,
    recorded: Option<&str>,
) -> ProviderResult<Ensured>
where
    P: ExternalResourceProvider + ?Sized,
{
    if let Some(id) = recorded_id(recorded) {
        if provider.exists(spec, id).await? {
            debug!(kind = provider.kind(), id, "External resource exists, reusing it");
            return Ok(Ensured::Existing(id.to_string()));
        }
        info!(
            kind = provider.kind(),
            id, "Recorded external resource is gone, creating it again"
        );
    }

    match provider.create(spec).await {
        Ok(id) => {
            info!(kind = provider.kind(), id = %id, "Created external resource");
            Ok(Ensured::Created(id))
        }
        Err(ProviderError::AlreadyExists(message)) => match provider.requested_id(spec) {
            Some(id) => {
                debug!(kind = provider.kind(), id, "External resource already exists");
                Ok(Ensured::Adopted(id.to_string()))
            }
            None => Err(ProviderError::AlreadyExists(message)),
        },
        Err(err) => Err(err),
    }
}

/// Delete the recorded resource if it exists.
///
/// NotFound from either call counts as success since the resource may have
/// been removed concurrently.
pub async fn get_or_delete<P>(
    provider: &P,
    spec: &P::Spec,
    recorded: Option<&str>,
) -> ProviderResult<Removal>
where
    P: ExternalResourceProvider + ?Sized,
{
    let Some(id) = recorded_id(recorded) else {
        return Ok(Removal::NeverCreated);
    };

    match provider.exists(spec, id).await {
        Ok(false) | Err(ProviderError::NotFound(_)) => {
            debug!(kind = provider.kind(), id, "External resource already gone");
            return Ok(Removal::AlreadyGone);
        }
        Ok(true) => {}
        Err(err) => return Err(err),
    }

    match provider.delete(spec, id).await {
        Ok(()) => {
            info!(kind = provider.kind(), id, "Deleted external resource");
            Ok(Removal::Deleted)
        }
        Err(ProviderError::NotFound(_)) => {
            debug!(
                kind = provider.kind(),
                id, "External resource vanished before delete"
            );
            Ok(Removal::AlreadyGone)
        }
        Err(err) => Err(err),
    }
}

/// A fresh, unpredictable topic name. Callers cache it in status before the
/// first create so later passes reuse it.
pub fn generate_topic_name() -> String {
    format!("{GENERATED_TOPIC_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Subscription name derived from the owning record's UID
pub fn subscription_name(uid: &str) -> String {
    format!("{SUBSCRIPTION_NAME_PREFIX}{uid}")
}
