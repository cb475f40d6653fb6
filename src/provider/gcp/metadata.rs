//! Project lookup through the metadata server.

use super::GcpRestClient;
use crate::observability::metrics;
use crate::provider::{ProjectResolver, ProviderError, ProviderResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{info_span, Instrument};

/// Resolves the default project of the workload. The answer is cached for
/// the life of the process.
#[derive(Debug)]
pub struct MetadataClient {
    client: Arc<GcpRestClient>,
    project: OnceCell<String>,
}

impl MetadataClient {
    pub fn new(client: Arc<GcpRestClient>) -> Self {
        Self {
            client,
            project: OnceCell::new(),
        }
    }

    async fn fetch_project_id(&self) -> ProviderResult<String> {
        let url = format!(
            "{}/computeMetadata/v1/project/project-id",
            self.client.metadata_endpoint()
        );
        let start = Instant::now();
        let response = self
            .client
            .http()
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("metadata server unavailable: {e}")));
        metrics::record_provider_operation("metadata", "project_id", start.elapsed().as_secs_f64());

        let response = response?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Transient(format!(
                "metadata server returned {status}: {body}"
            )));
        }
        let project = body.trim();
        if project.is_empty() {
            return Err(ProviderError::Transient(
                "metadata server returned an empty project id".to_string(),
            ));
        }
        Ok(project.to_string())
    }
}

#[async_trait]
impl ProjectResolver for MetadataClient {
    async fn project_id(&self) -> ProviderResult<String> {
        self.project
            .get_or_try_init(|| {
                self.fetch_project_id()
                    .instrument(info_span!("gcp.metadata.project_id"))
            })
            .await
            .cloned()
    }
}
