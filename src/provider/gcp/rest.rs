//! GCP REST Client
//!
//! Thin wrapper around `reqwest` shared by every GCP provider. It attaches an
//! OAuth2 token from the metadata server (Workload Identity), classifies
//! failures into [`ProviderError`], and records per-call metrics.
//!
//! References:
//! - [API errors](https://cloud.google.com/apis/design/errors)
//! - [Metadata server](https://cloud.google.com/compute/docs/metadata/querying-metadata)

use crate::observability::metrics;
use crate::provider::{ProviderError, ProviderResult};
use reqwest::{Client, Method};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before the metadata server says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// GCP API error response wrapper
#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpError,
}

/// Detailed error information from a GCP API
#[derive(Debug, Deserialize)]
struct GcpError {
    /// HTTP status code (e.g., 404, 403, 500)
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    /// Error status string (e.g., "NOT_FOUND", "PERMISSION_DENIED")
    #[serde(default)]
    status: String,
}

/// OAuth2 access token response from the metadata server
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Shared HTTP client for GCP REST APIs
pub struct GcpRestClient {
    http: Client,
    metadata_endpoint: String,
    static_token: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcpRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpRestClient")
            .field("metadata_endpoint", &self.metadata_endpoint)
            .field("static_token", &self.static_token.is_some())
            .finish_non_exhaustive()
    }
}

impl GcpRestClient {
    /// Create a client fetching tokens from `metadata_endpoint`.
    ///
    /// `GCP_ACCESS_TOKEN`, when set, is used verbatim instead; this is how
    /// the controller is pointed at emulators.
    pub fn new(metadata_endpoint: impl Into<String>) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Permanent(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            metadata_endpoint: metadata_endpoint.into().trim_end_matches('/').to_string(),
            static_token: std::env::var("GCP_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            token: Mutex::new(None),
        })
    }

    pub(super) fn http(&self) -> &Client {
        &self.http
    }

    pub(super) fn metadata_endpoint(&self) -> &str {
        &self.metadata_endpoint
    }

    async fn access_token(&self) -> ProviderResult<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.metadata_endpoint
        );
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("metadata server unavailable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // No credentials is retryable: Workload Identity may not be wired yet
            return Err(ProviderError::Transient(format!(
                "metadata server returned {status} for token request: {body}"
            )));
        }
        let token: TokenResponse = response.json().await?;
        debug!("Retrieved access token from metadata server");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// Issue an authenticated JSON request.
    ///
    /// Returns the decoded body, or `None` when the response has no body.
    /// Non-success statuses are classified with [`ProviderError::from_status`].
    pub async fn call(
        &self,
        service: &'static str,
        operation: &'static str,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> ProviderResult<Option<serde_json::Value>> {
        let start = Instant::now();
        let result = self.send(method, url, body).await;
        metrics::record_provider_operation(service, operation, start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            metrics::increment_provider_errors(service, err.class());
        }
        result
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> ProviderResult<Option<serde_json::Value>> {
        let token = self.access_token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ProviderError::Transient(format!("malformed response body: {e}")))
    }
}

/// Turn an error response into a classified [`ProviderError`].
///
/// The HTTP status decides the class; the structured error body, when
/// present, only supplies the message.
pub(crate) fn classify_error(status: u16, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<GcpErrorResponse>(body) {
        Ok(parsed) => format!(
            "{} (code: {}, status: {})",
            parsed.error.message, parsed.error.code, parsed.error.status
        ),
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => body.trim().to_string(),
    };
    ProviderError::from_status(status, message)
}

/// Percent-encode a single path segment
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_structured_error() {
        let body = r#"{"error":{"code":404,"message":"Resource not found (resource=t).","status":"NOT_FOUND"}}"#;
        match classify_error(404, body) {
            ProviderError::NotFound(message) => {
                assert!(message.contains("Resource not found"));
                assert!(message.contains("NOT_FOUND"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_plain_body() {
        assert_eq!(
            classify_error(503, "backend unavailable"),
            ProviderError::Transient("backend unavailable".into())
        );
        assert_eq!(
            classify_error(403, ""),
            ProviderError::Permanent("HTTP 403".into())
        );
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("gcs-abc_1.2"), "gcs-abc_1.2");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
    }
}
