//! HTTP transport to the remote workflow API.
//!
//! [`ApiTransport`] is the seam every remote call goes through; the execution
//! and discovery services only ever see `{status, data}` pairs. The concrete
//! [`HttpApiClient`] retries 5xx and 429 responses with exponential backoff
//! and surfaces other 4xx responses immediately.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use workflow_bridge_sdk::{BridgeError, Result};

pub use reqwest::Method;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Parsed response of one API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Perform one logical request. Retrying happens inside the transport;
    /// once an error surfaces here it is final for this layer.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse>;
}

/// reqwest-backed transport with retry/backoff.
pub struct HttpApiClient {
    base_url: String,
    client: reqwest::Client,
    retry_attempts: u32,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, retry_attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpApiClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            retry_attempts,
        })
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(16));
    exp.min(BACKOFF_CAP)
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

#[async_trait]
impl ApiTransport for HttpApiClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Accept", "application/json")
                .header("Accept-Language", "en");
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response.text().await.map_err(|e| {
                        BridgeError::network(format!("failed to read response from {path}: {e}"))
                    })?;
                    let data = if text.is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text).unwrap_or(Value::Null)
                    };

                    if (200..300).contains(&status) {
                        debug!(%method, path, status, "API request succeeded");
                        return Ok(ApiResponse { status, data });
                    }
                    if is_retryable_status(status) && attempt < self.retry_attempts {
                        let delay = backoff_delay(attempt);
                        warn!(
                            %method, path, status,
                            attempt, delay_ms = delay.as_millis() as u64,
                            "retryable API response, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(BridgeError::api_status(
                        format!("request to {path} failed with status {status}"),
                        status,
                    ));
                }
                Err(e) => {
                    if attempt < self.retry_attempts {
                        let delay = backoff_delay(attempt);
                        warn!(
                            %method, path, error = %e,
                            attempt, delay_ms = delay.as_millis() as u64,
                            "transport failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(BridgeError::network(format!(
                        "request to {path} failed: {e}"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), BACKOFF_CAP);
    }

    #[test]
    fn retryable_statuses_are_5xx_and_429() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = HttpApiClient::new("http://example.com/", 0).unwrap();
        assert_eq!(client.base_url, "http://example.com");
    }
}
