//! reqwest-backed implementation of the `HttpClient` port.
//!
//! Enforces a hard 30-second request timeout independent of step-level
//! retry policy.

use std::collections::HashMap;
use std::time::Duration;

use conductor_core::collab::{CollabError, HttpClient};
use conductor_types::collab::{HttpCall, HttpCallResult};
use futures_util::future::BoxFuture;

/// Hard per-request timeout for HTTP_REQUEST steps.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound HTTP executor backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("conductor-workflow/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn call(&self, request: HttpCall) -> BoxFuture<'_, Result<HttpCallResult, CollabError>> {
        Box::pin(async move {
            let method: reqwest::Method = request
                .method
                .parse()
                .map_err(|_| {
                    CollabError::RequestFailed(format!("invalid HTTP method: {}", request.method))
                })?;

            let mut builder = self.client.request(method, &request.url);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                CollabError::RequestFailed(format!("request to '{}' failed: {e}", request.url))
            })?;

            let status = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            let body = response.text().await.map_err(|e| {
                CollabError::RequestFailed(format!("failed to read response body: {e}"))
            })?;

            tracing::debug!(url = request.url.as_str(), status, "HTTP step request completed");
            Ok(HttpCallResult {
                status,
                headers,
                body,
            })
        })
    }
}
