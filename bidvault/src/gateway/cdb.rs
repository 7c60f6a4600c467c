//! The production auction gateway.

use super::http::AsyncHttpClient;
use super::types::{AuctionGateway, FetchResult, GatewayError, RequestContext};
use super::wire;
use crate::adunit::AdUnitKey;
use crate::bid::DEFAULT_BID_TTL_SECS;
use crate::ident::IdGenerator;
use crate::time::Clock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// URL of the auction endpoint.
    pub endpoint_url: String,
    /// TTL substituted for priced bids that arrive with `ttl = 0`.
    pub default_ttl_secs: u64,
}

impl GatewayConfig {
    /// Create a config for the given endpoint with the default TTL.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            default_ttl_secs: DEFAULT_BID_TTL_SECS,
        }
    }
}

/// Gateway to the CDB auction endpoint over HTTP.
///
/// Generic over the HTTP client so tests can substitute canned responses;
/// the coordinator sees it as `Arc<dyn AuctionGateway>`.
pub struct CdbGateway<C> {
    config: GatewayConfig,
    http: C,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl<C: AsyncHttpClient> CdbGateway<C> {
    /// Create a gateway.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint URL and TTL defaults
    /// * `http` - HTTP client to POST with
    /// * `ids` - Generator for per-slot impression ids
    /// * `clock` - Clock stamping `received_at` on parsed bids
    pub fn new(config: GatewayConfig, http: C, ids: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            http,
            ids,
            clock,
        }
    }

    async fn fetch_inner(
        &self,
        keys: &[AdUnitKey],
        ctx: &RequestContext,
    ) -> Result<FetchResult, GatewayError> {
        let (body, key_by_impression) = wire::build_request(keys, ctx, &self.ids);
        let json = serde_json::to_string(&body)
            .map_err(|e| GatewayError::Malformed(format!("request serialization: {}", e)))?;

        let bytes = self.http.post_json(&self.config.endpoint_url, &json).await?;

        let response: wire::BidResponseBody = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let received_at = self.clock.now();
        let mut bids_by_key = HashMap::new();
        let mut skipped = 0usize;

        for raw in response.slots {
            let slot: wire::SlotResponseBody = match serde_json::from_value(raw) {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable slot");
                    skipped += 1;
                    continue;
                }
            };

            let Some(key) = key_by_impression.get(&slot.impression_id) else {
                warn!(
                    impression_id = %slot.impression_id,
                    placement_id = %slot.placement_id,
                    "Skipping slot for unknown impression"
                );
                skipped += 1;
                continue;
            };

            match wire::bid_from_slot(slot, received_at, self.config.default_ttl_secs) {
                Ok(bid) => {
                    bids_by_key.insert(key.clone(), bid);
                }
                Err(reason) => {
                    warn!(key = %key, reason, "Skipping malformed slot");
                    skipped += 1;
                }
            }
        }

        debug!(
            correlation_id = %ctx.correlation_id,
            requested = keys.len(),
            received = bids_by_key.len(),
            skipped,
            kill_switch = ?response.config.as_ref().map(|c| c.kill_switch),
            "Auction response parsed"
        );

        Ok(FetchResult {
            bids_by_key,
            kill_switch: response.config.map(|c| c.kill_switch),
            retry_after_seconds: response.time_to_next_call,
        })
    }
}

impl<C: AsyncHttpClient> AuctionGateway for CdbGateway<C> {
    fn fetch<'a>(
        &'a self,
        keys: &'a [AdUnitKey],
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<FetchResult, GatewayError>> + Send + 'a>> {
        Box::pin(self.fetch_inner(keys, ctx))
    }
}
