//! # API Client
//!
//! Thin `reqwest` wrapper around a running farmcert-api. Responses are kept
//! as JSON values: the CLI prints them and reads only a handful of fields.
//!
//! Non-2xx responses are not errors at this layer. Verification answers 404
//! and 503 with a meaningful body, so callers decide per status.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use url::Url;

/// A status code and the decoded body (`Null` when the body is empty or
/// not JSON).
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `error.message` of an error body, or the status code.
    pub fn error_message(&self) -> String {
        match self.body.pointer("/error/message").and_then(Value::as_str) {
            Some(message) => format!("HTTP {}: {message}", self.status),
            None => format!("HTTP {}", self.status),
        }
    }
}

/// Client for the farmcert HTTP API.
#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client. `token` is sent as a bearer token when present.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url).with_context(|| format!("invalid API URL {base_url:?}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!("API URL must be http or https, got {}", base_url.scheme());
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("token contains characters not allowed in a header")?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Resolve `path` (without a leading slash) against the base URL.
    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid request path {path:?}"))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<ApiResponse> {
        let url = self.url(path)?;
        tracing::debug!(%url, "GET");
        self.send(self.client.get(url)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> anyhow::Result<ApiResponse> {
        let url = self.url(path)?;
        tracing::debug!(%url, "POST");
        self.send(self.client.post(url).json(body)).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<ApiResponse> {
        let resp = request.send().await.context("request to farmcert-api failed")?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.context("failed to read response body")?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn paths_resolve_under_base_prefix() {
        let c = client("http://localhost:8080/api");
        assert_eq!(
            c.url("/certifications/by-id/CERT-1").unwrap().as_str(),
            "http://localhost:8080/api/certifications/by-id/CERT-1"
        );
    }

    #[test]
    fn paths_resolve_at_root() {
        let c = client("http://localhost:8080");
        assert_eq!(
            c.url("certifications/stats").unwrap().as_str(),
            "http://localhost:8080/certifications/stats"
        );
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(ApiClient::new("ftp://host", None, Duration::from_secs(1)).is_err());
        assert!(ApiClient::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn error_message_prefers_body() {
        let resp = ApiResponse {
            status: 422,
            body: json!({"error": {"code": "INCOMPLETE_DOCUMENTS", "message": "missing identity"}}),
        };
        assert!(!resp.is_success());
        assert_eq!(resp.error_message(), "HTTP 422: missing identity");

        let bare = ApiResponse {
            status: 502,
            body: Value::Null,
        };
        assert_eq!(bare.error_message(), "HTTP 502");
    }
}
