//! The fetch coordinator.
//!
//! ```text
//! caller ──► request_bid ──► ConsentGate / KillSwitchConfig
//!                │
//!                ▼                    ┌────────────────────────────┐
//!          ┌──────────┐   miss       │  ticket table              │
//!          │ BidCache │─────────────►│  (one fetch per ad unit)   │
//!          └──────────┘              └─────────────┬──────────────┘
//!                │ hit                             │ owner spawns
//!                ▼                                 ▼
//!          bid + background                 AuctionGateway.fetch
//!          replenishment                    └─► cache + waiters
//! ```
//!
//! All cache mutation and ticket bookkeeping happen inside one mutex; the
//! network call itself never runs under it. Waiters park on the ticket's
//! completion channel and re-check the cache when it fires, so a single
//! auction win is consumed exactly once no matter how many callers raced.

use crate::adunit::AdUnitKey;
use crate::bid::Bid;
use crate::cache::{BidCache, TakeResult};
use crate::config::KillSwitchConfig;
use crate::consent::ConsentGate;
use crate::coordinator::policy::ReplenishPolicy;
use crate::coordinator::stats::{CoordinatorStats, CoordinatorStatsSnapshot};
use crate::coordinator::ticket::TicketTable;
use crate::gateway::{AuctionGateway, DeviceInfo, PublisherInfo, RequestContext};
use crate::ident::IdGenerator;
use crate::time::Clock;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Default number of ad units per prefetch gateway call.
const DEFAULT_PREFETCH_BATCH_SIZE: usize = 8;

/// Why a fetch was dispatched. Logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOrigin {
    OnDemand,
    Prefetch,
    Replenish,
}

impl FetchOrigin {
    fn as_str(self) -> &'static str {
        match self {
            FetchOrigin::OnDemand => "on-demand",
            FetchOrigin::Prefetch => "prefetch",
            FetchOrigin::Replenish => "replenish",
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Publisher identity stamped on every fetch.
    pub publisher: PublisherInfo,
    /// Device identity stamped on every fetch.
    pub device: DeviceInfo,
    /// Maximum ad units per prefetch gateway call.
    pub prefetch_batch_size: usize,
}

impl CoordinatorConfig {
    /// Create a config with the default batch size.
    pub fn new(publisher: PublisherInfo, device: DeviceInfo) -> Self {
        Self {
            publisher,
            device,
            prefetch_batch_size: DEFAULT_PREFETCH_BATCH_SIZE,
        }
    }

    /// Override the prefetch batch size.
    pub fn with_prefetch_batch_size(mut self, size: usize) -> Self {
        self.prefetch_batch_size = size.max(1);
        self
    }
}

/// State guarded by the coordinator's single mutex: the cache and the
/// ticket table move together, which is what makes the at-most-one-fetch
/// invariant enforceable in one place.
struct Inner {
    cache: BidCache,
    tickets: TicketTable,
}

/// Orchestrates bid consumption, prefetching and fetch deduplication.
///
/// Constructed once by the engine and shared behind an `Arc`; every public
/// entry point takes `self: &Arc<Self>` because background fetches need to
/// outlive the calling task.
pub struct FetchCoordinator {
    inner: Mutex<Inner>,
    gateway: Arc<dyn AuctionGateway>,
    consent: ConsentGate,
    kill_switch: Arc<KillSwitchConfig>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    policy: Box<dyn ReplenishPolicy>,
    config: CoordinatorConfig,
    stats: Arc<CoordinatorStats>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl FetchCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `config` - Identity and batching configuration
    /// * `gateway` - The auction endpoint
    /// * `consent` - Gate consulted before any network decision
    /// * `kill_switch` - Server-driven suspension state, updated from responses
    /// * `ids` - Correlation-id generator
    /// * `clock` - Clock for TTL checks and replenishment cooldowns
    /// * `policy` - Prefetch-on-consume policy
    pub fn new(
        config: CoordinatorConfig,
        gateway: Arc<dyn AuctionGateway>,
        consent: ConsentGate,
        kill_switch: Arc<KillSwitchConfig>,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        policy: Box<dyn ReplenishPolicy>,
    ) -> Self {
        debug!(
            batch_size = config.prefetch_batch_size,
            policy = policy.description(),
            "Fetch coordinator created"
        );
        Self {
            inner: Mutex::new(Inner {
                cache: BidCache::new(),
                tickets: TicketTable::new(),
            }),
            gateway,
            consent,
            kill_switch,
            ids,
            clock,
            policy,
            config,
            stats: Arc::new(CoordinatorStats::new()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Request a bid for one ad unit, consuming it from the cache.
    ///
    /// Resolves with `None` when consent is denied, the kill switch is
    /// active, a silence window is open, or the fetch yields nothing; a
    /// failure never escapes as an error. A cache hit triggers a background
    /// replenishment fetch so the next call is likely served from cache.
    pub async fn request_bid(self: &Arc<Self>, key: &AdUnitKey) -> Option<Bid> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        if !self.consent.allows_bidding() {
            self.stats.consent_denied.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Bidding not consented, resolving without bid");
            return None;
        }
        if self.kill_switch.is_enabled() {
            self.stats.kill_switched.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Kill switch active, resolving without bid");
            return None;
        }

        let now = self.clock.now();

        // First pass under the lock: consume from the cache, or register
        // against the ticket table.
        let registration = {
            let mut inner = self.inner.lock().unwrap();
            match inner.cache.take(key, now) {
                TakeResult::Hit(bid) => {
                    drop(inner);
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, cpm = %bid.cpm, "Bid served from cache");
                    self.maybe_replenish(key, now);
                    return Some(bid);
                }
                TakeResult::Silenced => {
                    self.stats.silenced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Silence window active, resolving without bid");
                    return None;
                }
                TakeResult::Miss => inner.tickets.register(key.clone()),
            }
        };

        let opened = registration.is_opened();
        if opened {
            self.spawn_fetch(vec![key.clone()], FetchOrigin::OnDemand);
        } else {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Fetch already in flight, waiting on ticket");
        }

        // Park until the ticket completes. A closed channel (cancelled
        // fetch, shutdown) wakes us just the same.
        let mut rx = registration.into_receiver();
        let _ = rx.recv().await;

        // Second pass: resolve from whatever the fetch stored. Exactly one
        // of the racing callers gets the bid; the rest see a miss or the
        // silence entry. No replenishment here: the entry is brand new.
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        match inner.cache.take(key, now) {
            TakeResult::Hit(bid) => {
                debug!(key = %key, cpm = %bid.cpm, opened, "Bid resolved from fetch");
                Some(bid)
            }
            TakeResult::Silenced | TakeResult::Miss => None,
        }
    }

    /// Warm the cache for every registered ad unit.
    ///
    /// Fire-and-forget: issues background fetches for all keys without an
    /// in-flight ticket, batched per gateway call. Never short-circuits on
    /// a cache hit. Warm-up deliberately refreshes everything.
    pub fn prefetch_all(self: &Arc<Self>, keys: impl IntoIterator<Item = AdUnitKey>) {
        if !self.consent.allows_bidding() {
            debug!("Skipping prefetch, bidding not consented");
            return;
        }
        if self.kill_switch.is_enabled() {
            debug!("Skipping prefetch, kill switch active");
            return;
        }

        let keys: Vec<AdUnitKey> = {
            let mut seen = HashSet::new();
            keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
        };
        if keys.is_empty() {
            return;
        }

        info!(ad_units = keys.len(), "Prefetching registered ad units");

        for chunk in keys.chunks(self.config.prefetch_batch_size) {
            let to_fetch = {
                let mut inner = self.inner.lock().unwrap();
                inner.tickets.open_many(chunk.iter().cloned())
            };
            if to_fetch.is_empty() {
                continue;
            }
            self.spawn_fetch(to_fetch, FetchOrigin::Prefetch);
        }
    }

    /// Shut the coordinator down: cancel in-flight fetches and wait for
    /// their cleanup, then wake any remaining waiter.
    pub async fn shutdown(&self) {
        info!("Shutting down fetch coordinator");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        // In-flight tasks close their own tickets; this catches tickets
        // opened after cancellation so no waiter is ever left pending.
        let mut inner = self.inner.lock().unwrap();
        inner.tickets.close_all();
        info!("Fetch coordinator stopped");
    }

    /// Snapshot of the coordinator counters.
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of cached entries, expired or not. Diagnostics only.
    pub fn cache_size(&self) -> usize {
        self.inner.lock().unwrap().cache.size()
    }

    /// Number of in-flight fetch tickets. Diagnostics only.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().tickets.len()
    }

    /// Trigger a background replenishment for a just-consumed key, subject
    /// to the policy and ticket dedup.
    fn maybe_replenish(self: &Arc<Self>, key: &AdUnitKey, now: chrono::DateTime<chrono::Utc>) {
        if !self.policy.should_replenish(key, now) {
            trace!(key = %key, policy = self.policy.description(), "Replenishment suppressed by policy");
            return;
        }

        let opened = {
            let mut inner = self.inner.lock().unwrap();
            inner.tickets.open_many(std::iter::once(key.clone()))
        };
        if opened.is_empty() {
            trace!(key = %key, "Replenishment already in flight");
            return;
        }

        self.stats.replenishments.fetch_add(1, Ordering::Relaxed);
        self.spawn_fetch(opened, FetchOrigin::Replenish);
    }

    /// Spawn the fetch task for keys whose tickets are already open.
    fn spawn_fetch(self: &Arc<Self>, keys: Vec<AdUnitKey>, origin: FetchOrigin) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            this.run_fetch(keys, origin).await;
        });
    }

    /// Execute one gateway fetch and apply its outcome.
    ///
    /// Owns the tickets for `keys`: whether the fetch succeeds, fails or is
    /// cancelled, they are closed exactly once, after the cache has been
    /// updated (or deliberately left untouched).
    async fn run_fetch(self: Arc<Self>, keys: Vec<AdUnitKey>, origin: FetchOrigin) {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let ctx = RequestContext {
            correlation_id: self.ids.generate(),
            consent_given: self.consent.allows_bidding(),
            publisher: self.config.publisher.clone(),
            device: self.config.device.clone(),
        };

        debug!(
            correlation_id = %ctx.correlation_id,
            ad_units = keys.len(),
            origin = origin.as_str(),
            "Dispatching auction fetch"
        );

        let outcome = tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => None,
            result = self.gateway.fetch(&keys, &ctx) => Some(result),
        };

        match outcome {
            Some(Ok(result)) => {
                if let Some(seconds) = result.retry_after_seconds {
                    self.stats.note_retry_after(seconds);
                }

                let stored = {
                    let mut inner = self.inner.lock().unwrap();
                    let mut stored = 0u64;
                    for key in &keys {
                        if let Some(bid) = result.bids_by_key.get(key) {
                            inner.cache.put(key.clone(), bid.clone());
                            stored += 1;
                        }
                    }
                    stored
                };
                self.stats.bids_cached.fetch_add(stored, Ordering::Relaxed);

                // Apply the config update before waking waiters, and outside
                // the mutex: persisting the flag touches the filesystem.
                if let Some(enabled) = result.kill_switch {
                    self.kill_switch.apply_update(enabled);
                }

                {
                    let mut inner = self.inner.lock().unwrap();
                    for key in &keys {
                        inner.tickets.close(key);
                    }
                }

                debug!(
                    correlation_id = %ctx.correlation_id,
                    stored,
                    ad_units = keys.len(),
                    "Fetch applied to cache"
                );
            }
            Some(Err(e)) => {
                self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %ctx.correlation_id,
                    ad_units = keys.len(),
                    error = %e,
                    "Auction fetch failed, resolving waiters without bid"
                );
                let mut inner = self.inner.lock().unwrap();
                for key in &keys {
                    inner.tickets.close(key);
                }
            }
            None => {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    ad_units = keys.len(),
                    "Fetch cancelled during shutdown"
                );
                let mut inner = self.inner.lock().unwrap();
                for key in &keys {
                    inner.tickets.close(key);
                }
            }
        }
    }
}
