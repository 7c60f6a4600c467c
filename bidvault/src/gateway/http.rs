//! HTTP client abstraction for testability.

use super::types::GatewayError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default request timeout for auction calls.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Asynchronous HTTP client used by the gateway.
///
/// The auction endpoint is a single POST surface, so one method suffices.
/// The abstraction exists for dependency injection: production uses
/// [`AsyncReqwestClient`], tests substitute canned responses.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs an async HTTP POST with a JSON body.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    /// * `json_body` - JSON body as a string
    ///
    /// # Returns
    ///
    /// The response body as bytes, or an error for transport failures and
    /// non-2xx statuses.
    fn post_json(
        &self,
        url: &str,
        json_body: &str,
    ) -> impl Future<Output = Result<Vec<u8>, GatewayError>> + Send;
}

/// Async HTTP client implementation using reqwest.
///
/// Uses non-blocking I/O with a warm connection pool: bursts of fetches at
/// SDK initialization reuse connections instead of re-handshaking.
#[derive(Clone)]
pub struct AsyncReqwestClient {
    client: reqwest::Client,
}

impl AsyncReqwestClient {
    /// Creates a new client with the default timeout.
    pub fn new() -> Result<Self, GatewayError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a new client with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("bidvault/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::ClientBuild(e.to_string()))?;

        Ok(Self { client })
    }
}

impl AsyncHttpClient for AsyncReqwestClient {
    async fn post_json(&self, url: &str, json_body: &str) -> Result<Vec<u8>, GatewayError> {
        trace!(url, bytes = json_body.len(), "HTTP POST starting");

        let response = match self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(json_body.to_string())
            .send()
            .await
        {
            Ok(resp) => {
                debug!(url, status = resp.status().as_u16(), "HTTP response received");
                resp
            }
            Err(e) => {
                warn!(
                    url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(GatewayError::Http(format!("POST request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "HTTP error status");
            return Err(GatewayError::ErrorStatus(status.as_u16()));
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(url, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes.to_vec())
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to read response body");
                Err(GatewayError::Http(format!("Failed to read response: {}", e)))
            }
        }
    }
}
