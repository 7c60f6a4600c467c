//! Gateway types and traits.

use crate::adunit::AdUnitKey;
use crate::bid::Bid;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from talking to the auction endpoint.
///
/// None of these ever reach rendering code; the coordinator degrades every
/// one of them to "no bid".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Endpoint answered with a non-2xx status
    #[error("HTTP status {0} from auction endpoint")]
    ErrorStatus(u16),

    /// Response body did not parse as an auction response
    #[error("Malformed auction response: {0}")]
    Malformed(String),

    /// HTTP client could not be constructed
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

/// Publisher identity sent with every fetch.
#[derive(Debug, Clone)]
pub struct PublisherInfo {
    /// Application bundle identifier.
    pub bundle_id: String,
    /// Publisher account identifier at the auction endpoint.
    pub publisher_id: String,
}

impl PublisherInfo {
    /// Create publisher identity.
    pub fn new(bundle_id: impl Into<String>, publisher_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            publisher_id: publisher_id.into(),
        }
    }
}

/// Device and SDK identity sent with every fetch.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Advertising identifier of the device.
    pub device_id: String,
    /// Operating system name.
    pub os: String,
    /// SDK version string.
    pub sdk_version: String,
}

impl DeviceInfo {
    /// Create device identity.
    pub fn new(
        device_id: impl Into<String>,
        os: impl Into<String>,
        sdk_version: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            os: os.into(),
            sdk_version: sdk_version.into(),
        }
    }
}

/// Per-fetch context: identity plus a fresh correlation id and the consent
/// snapshot taken when the fetch was decided.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for this fetch, from the id generator.
    pub correlation_id: String,
    /// Consent snapshot at fetch time.
    pub consent_given: bool,
    /// Publisher identity.
    pub publisher: PublisherInfo,
    /// Device identity.
    pub device: DeviceInfo,
}

/// Outcome of one successful gateway fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Bids keyed by the ad unit they answer. Keys absent from the response
    /// are simply absent here.
    pub bids_by_key: HashMap<AdUnitKey, Bid>,
    /// Kill-switch instruction, when the response carried a config object.
    pub kill_switch: Option<bool>,
    /// Server-suggested delay before the next call, surfaced for an
    /// external caller-side throttle. Not enforced by this engine.
    pub retry_after_seconds: Option<u64>,
}

/// The auction endpoint, as seen by the coordinator.
///
/// Object-safe so the coordinator can hold `Arc<dyn AuctionGateway>` and
/// tests can substitute a scripted gateway.
pub trait AuctionGateway: Send + Sync {
    /// Fetch bids for `keys`. Invoked from a background task, never a
    /// caller's thread.
    fn fetch<'a>(
        &'a self,
        keys: &'a [AdUnitKey],
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<FetchResult, GatewayError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GatewayError::ErrorStatus(500).to_string(),
            "HTTP status 500 from auction endpoint"
        );
        assert!(GatewayError::Http("refused".into()).to_string().contains("refused"));
    }

    #[test]
    fn test_fetch_result_default_is_empty() {
        let result = FetchResult::default();
        assert!(result.bids_by_key.is_empty());
        assert_eq!(result.kill_switch, None);
        assert_eq!(result.retry_after_seconds, None);
    }
}
