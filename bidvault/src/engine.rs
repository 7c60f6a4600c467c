//! High-level facade for the bidding engine.
//!
//! [`BidEngine`] is the explicitly constructed object the host SDK owns: it
//! wires the consent gate, kill-switch config, id generator, gateway and
//! coordinator together and is passed to whatever needs bid access; there
//! is no process-wide singleton. Rendering and mediation callers only ever
//! see `request_bid` / `prefetch_all`.

use crate::adunit::AdUnitKey;
use crate::bid::Bid;
use crate::config::{default_config_path, ConfigStorage, IniFileStorage, KillSwitchConfig};
use crate::consent::{ConsentGate, ConsentStorage};
use crate::coordinator::{
    AlwaysReplenish, CoordinatorConfig, CoordinatorStatsSnapshot, FetchCoordinator, ReplenishPolicy,
};
use crate::gateway::{
    AsyncHttpClient, AsyncReqwestClient, AuctionGateway, CdbGateway, DeviceInfo, GatewayConfig,
    GatewayError, PublisherInfo,
};
use crate::ident::{IdGenerator, OsRandom, RandomSource};
use crate::time::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from engine construction.
///
/// Once built, the engine never surfaces an error to callers; every
/// runtime failure degrades to "no bid".
#[derive(Debug, Error)]
pub enum EngineError {
    /// The gateway's HTTP client could not be created
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// URL of the auction endpoint.
    pub endpoint_url: String,
    /// Publisher identity.
    pub publisher: PublisherInfo,
    /// Device identity.
    pub device: DeviceInfo,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum ad units per prefetch gateway call.
    pub prefetch_batch_size: usize,
    /// Path of the persisted config file. `None` uses the default location.
    pub config_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Create a config with defaults for everything but identity.
    pub fn new(
        endpoint_url: impl Into<String>,
        publisher: PublisherInfo,
        device: DeviceInfo,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            publisher,
            device,
            request_timeout_secs: 10,
            prefetch_batch_size: 8,
            config_path: None,
        }
    }

    /// Override the HTTP request timeout.
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Override the prefetch batch size.
    pub fn with_prefetch_batch_size(mut self, size: usize) -> Self {
        self.prefetch_batch_size = size;
        self
    }

    /// Override the persisted config file location.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

/// Builder assembling a [`BidEngine`] with injectable collaborators.
///
/// Production wiring needs nothing beyond [`BidEngine::new`]; tests swap in
/// fixed clocks, seeded randomness, in-memory config storage or a scripted
/// gateway.
pub struct BidEngineBuilder {
    config: EngineConfig,
    consent: Arc<dyn ConsentStorage>,
    clock: Option<Arc<dyn Clock>>,
    random: Option<Box<dyn RandomSource>>,
    config_storage: Option<Arc<dyn ConfigStorage>>,
    gateway: Option<Arc<dyn AuctionGateway>>,
    policy: Option<Box<dyn ReplenishPolicy>>,
}

impl BidEngineBuilder {
    /// Override the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the random source.
    pub fn with_random(mut self, random: Box<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    /// Override the persisted config storage.
    pub fn with_config_storage(mut self, storage: Arc<dyn ConfigStorage>) -> Self {
        self.config_storage = Some(storage);
        self
    }

    /// Override the auction gateway entirely.
    pub fn with_gateway(mut self, gateway: Arc<dyn AuctionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Use a custom HTTP client with the standard gateway. Requires the
    /// clock/random overrides to be set beforehand if determinism matters.
    pub fn with_http_client<C: AsyncHttpClient + 'static>(self, http: C) -> Self {
        let clock = self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock));
        let ids = Arc::new(IdGenerator::new(clock.clone(), Box::new(OsRandom)));
        let gateway = CdbGateway::new(
            GatewayConfig::new(self.config.endpoint_url.clone()),
            http,
            ids,
            clock,
        );
        self.with_gateway(Arc::new(gateway))
    }

    /// Override the replenishment policy.
    pub fn with_replenish_policy(mut self, policy: Box<dyn ReplenishPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Assemble the engine.
    pub fn build(self) -> Result<BidEngine, EngineError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let random = self.random.unwrap_or_else(|| Box::new(OsRandom));
        let ids = Arc::new(IdGenerator::new(clock.clone(), random));

        let config_storage = self.config_storage.unwrap_or_else(|| {
            let path = self
                .config
                .config_path
                .clone()
                .unwrap_or_else(default_config_path);
            Arc::new(IniFileStorage::new(path))
        });
        let kill_switch = Arc::new(KillSwitchConfig::load(config_storage));

        let gateway: Arc<dyn AuctionGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => {
                let http = AsyncReqwestClient::with_timeout(self.config.request_timeout_secs)?;
                Arc::new(CdbGateway::new(
                    GatewayConfig::new(self.config.endpoint_url.clone()),
                    http,
                    ids.clone(),
                    clock.clone(),
                ))
            }
        };

        let policy = self.policy.unwrap_or_else(|| Box::new(AlwaysReplenish));

        let coordinator_config = CoordinatorConfig::new(
            self.config.publisher.clone(),
            self.config.device.clone(),
        )
        .with_prefetch_batch_size(self.config.prefetch_batch_size);

        let coordinator = Arc::new(FetchCoordinator::new(
            coordinator_config,
            gateway,
            ConsentGate::new(self.consent),
            kill_switch.clone(),
            ids,
            clock,
            policy,
        ));

        info!(endpoint = %self.config.endpoint_url, "Bid engine initialized");

        Ok(BidEngine {
            coordinator,
            kill_switch,
        })
    }
}

/// The bidding engine.
///
/// Cheap to share: callers typically hold it behind an `Arc` owned by the
/// SDK's top-level initialization object.
pub struct BidEngine {
    coordinator: Arc<FetchCoordinator>,
    kill_switch: Arc<KillSwitchConfig>,
}

impl BidEngine {
    /// Build an engine with production wiring.
    pub fn new(config: EngineConfig, consent: Arc<dyn ConsentStorage>) -> Result<Self, EngineError> {
        Self::builder(config, consent).build()
    }

    /// Start building an engine with injectable collaborators.
    pub fn builder(config: EngineConfig, consent: Arc<dyn ConsentStorage>) -> BidEngineBuilder {
        BidEngineBuilder {
            config,
            consent,
            clock: None,
            random: None,
            config_storage: None,
            gateway: None,
            policy: None,
        }
    }

    /// Request a bid for one ad unit (consuming call).
    ///
    /// Always resolves; never returns an error and never panics across this
    /// boundary. "No bid" covers denial, suspension, silence, misses and
    /// network failure alike.
    pub async fn request_bid(&self, key: &AdUnitKey) -> Option<Bid> {
        self.coordinator.request_bid(key).await
    }

    /// Warm the cache for every registered ad unit (non-consuming call).
    ///
    /// Fire-and-forget; must be called from within a tokio runtime.
    pub fn prefetch_all(&self, keys: impl IntoIterator<Item = AdUnitKey>) {
        self.coordinator.prefetch_all(keys);
    }

    /// Whether the server has currently suspended all bidding.
    pub fn is_suspended(&self) -> bool {
        self.kill_switch.is_enabled()
    }

    /// Snapshot of the coordinator counters.
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.coordinator.stats()
    }

    /// Number of cached entries. Diagnostics only.
    pub fn cache_size(&self) -> usize {
        self.coordinator.cache_size()
    }

    /// Number of in-flight fetches. Diagnostics only.
    pub fn in_flight_count(&self) -> usize {
        self.coordinator.in_flight_count()
    }

    /// Shut down: cancel in-flight fetches, resolve all waiters, and wait
    /// for background tasks to finish.
    ///
    /// Takes `&self` so hosts holding the engine behind an `Arc` can shut
    /// down while callers are still parked on it; those callers resolve
    /// with "no bid" rather than hanging.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
