//! # Sink Resolution
//!
//! Turns a [`Destination`] into the URI events are delivered to.
//!
//! - A `uri` alone must be absolute and is used as is.
//! - A `ref` to a core `v1` Service resolves to its cluster-local DNS name.
//! - Any other `ref` must publish `status.address.url`.
//! - A `ref` plus a relative `uri` joins the two.

use crate::crd::{Destination, KReference};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static ABSOLUTE_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("Failed to compile ABSOLUTE_URI regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} does not have an address")]
    NoAddress(String),
    #[error("destination has neither ref nor uri")]
    Empty,
    #[error("invalid uri {0:?}")]
    InvalidUri(String),
    #[error("failed to look up {0}")]
    Lookup(String),
}

impl SinkError {
    /// Condition reason recorded when resolution fails
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::NoAddress(_) => "NoAddress",
            Self::Empty => "EmptyDestination",
            Self::InvalidUri(_) => "InvalidURI",
            Self::Lookup(_) => "LookupFailed",
        }
    }
}

#[async_trait]
pub trait SinkResolver: Send + Sync {
    /// Resolve `destination`; references without a namespace default to
    /// `namespace`.
    async fn resolve(&self, destination: &Destination, namespace: &str)
        -> Result<String, SinkError>;
}

pub fn is_absolute_uri(uri: &str) -> bool {
    ABSOLUTE_URI.is_match(uri)
}

/// Append a relative `uri` to the address of a reference
pub fn join_uri(base: &str, relative: Option<&str>) -> Result<String, SinkError> {
    let Some(relative) = relative.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(base.to_string());
    };
    if is_absolute_uri(relative) {
        return Err(SinkError::InvalidUri(relative.to_string()));
    }
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    ))
}

/// Resolve a bare-uri destination without touching the cluster
pub fn resolve_uri_only(destination: &Destination) -> Option<Result<String, SinkError>> {
    if destination.reference.is_some() {
        return None;
    }
    Some(match destination.uri.as_deref().map(str::trim) {
        None | Some("") => Err(SinkError::Empty),
        Some(uri) if is_absolute_uri(uri) => Ok(uri.to_string()),
        Some(uri) => Err(SinkError::InvalidUri(uri.to_string())),
    })
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Resolves references against the Kubernetes API
#[derive(Clone)]
pub struct KubeSinkResolver {
    client: Client,
}

impl std::fmt::Debug for KubeSinkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSinkResolver").finish_non_exhaustive()
    }
}

impl KubeSinkResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn address_of(&self, reference: &KReference, namespace: &str) -> Result<String, SinkError> {
        let display = format!("{}/{} {}", namespace, reference.name, reference.kind);
        let (group, version) = split_api_version(&reference.api_version);

        if group.is_empty() && version == "v1" && reference.kind == "Service" {
            let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
            return match services.get(&reference.name).await {
                Ok(_) => Ok(format!(
                    "http://{}.{}.svc.cluster.local/",
                    reference.name, namespace
                )),
                Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                    Err(SinkError::NotFound(display))
                }
                Err(e) => Err(SinkError::Lookup(format!("{display}: {e}"))),
            };
        }

        let gvk = GroupVersionKind::gvk(group, version, &reference.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let object = match api.get(&reference.name).await {
            Ok(object) => object,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                return Err(SinkError::NotFound(display));
            }
            Err(e) => return Err(SinkError::Lookup(format!("{display}: {e}"))),
        };
        object
            .data
            .pointer("/status/address/url")
            .and_then(|url| url.as_str())
            .filter(|url| !url.is_empty())
            .map(ToString::to_string)
            .ok_or(SinkError::NoAddress(display))
    }
}

#[async_trait]
impl SinkResolver for KubeSinkResolver {
    async fn resolve(
        &self,
        destination: &Destination,
        namespace: &str,
    ) -> Result<String, SinkError> {
        if let Some(resolved) = resolve_uri_only(destination) {
            return resolved;
        }
        let Some(reference) = &destination.reference else {
            return Err(SinkError::Empty);
        };
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);
        let base = self.address_of(reference, namespace).await?;
        let uri = join_uri(&base, destination.uri.as_deref())?;
        debug!(sink = %uri, "Resolved destination");
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_only_destination() {
        let destination = Destination {
            reference: None,
            uri: Some("https://events.example.com/ingest".into()),
        };
        assert_eq!(
            resolve_uri_only(&destination).unwrap().unwrap(),
            "https://events.example.com/ingest"
        );
    }

    #[test]
    fn test_relative_uri_without_ref_is_invalid() {
        let destination = Destination {
            reference: None,
            uri: Some("/ingest".into()),
        };
        assert_eq!(
            resolve_uri_only(&destination).unwrap().unwrap_err().reason(),
            "InvalidURI"
        );
        assert_eq!(
            resolve_uri_only(&Destination::default()).unwrap(),
            Err(SinkError::Empty)
        );
    }

    #[test]
    fn test_join_uri() {
        let base = "http://display.default.svc.cluster.local/";
        assert_eq!(join_uri(base, None).unwrap(), base);
        assert_eq!(
            join_uri(base, Some("/events")).unwrap(),
            "http://display.default.svc.cluster.local/events"
        );
        assert!(join_uri(base, Some("http://elsewhere")).is_err());
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(
            split_api_version("serving.knative.dev/v1"),
            ("serving.knative.dev", "v1")
        );
    }

    #[test]
    fn test_error_reasons() {
        assert_eq!(SinkError::NotFound("x".into()).reason(), "NotFound");
        assert_eq!(SinkError::NoAddress("x".into()).reason(), "NoAddress");
    }
}
