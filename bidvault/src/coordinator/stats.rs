//! Coordinator statistics for monitoring.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters updated by the coordinator, lock-free.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Total `request_bid` calls.
    pub requests: AtomicU64,
    /// Requests resolved without bid because consent was denied.
    pub consent_denied: AtomicU64,
    /// Requests resolved without bid because the kill switch was active.
    pub kill_switched: AtomicU64,
    /// Requests served straight from the cache.
    pub cache_hits: AtomicU64,
    /// Requests resolved without bid inside a silence window.
    pub silenced: AtomicU64,
    /// Requests that waited on an existing ticket instead of fetching.
    pub coalesced: AtomicU64,
    /// Gateway fetches dispatched.
    pub fetches: AtomicU64,
    /// Gateway fetches that failed.
    pub fetch_failures: AtomicU64,
    /// Bids written into the cache.
    pub bids_cached: AtomicU64,
    /// Background replenishment fetches triggered by consumption.
    pub replenishments: AtomicU64,
    /// Last `retryAfterSeconds` hint from the server, -1 when never seen.
    last_retry_after: AtomicI64,
}

impl CoordinatorStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            last_retry_after: AtomicI64::new(-1),
            ..Self::default()
        }
    }

    /// Record the server's latest back-off hint.
    pub fn note_retry_after(&self, seconds: u64) {
        self.last_retry_after
            .store(seconds.min(i64::MAX as u64) as i64, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        let retry = self.last_retry_after.load(Ordering::Relaxed);
        CoordinatorStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            consent_denied: self.consent_denied.load(Ordering::Relaxed),
            kill_switched: self.kill_switched.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            silenced: self.silenced.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            bids_cached: self.bids_cached.load(Ordering::Relaxed),
            replenishments: self.replenishments.load(Ordering::Relaxed),
            last_retry_after_seconds: (retry >= 0).then_some(retry as u64),
        }
    }
}

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    pub requests: u64,
    pub consent_denied: u64,
    pub kill_switched: u64,
    pub cache_hits: u64,
    pub silenced: u64,
    pub coalesced: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub bids_cached: u64,
    pub replenishments: u64,
    pub last_retry_after_seconds: Option<u64>,
}
