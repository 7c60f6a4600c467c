//! Replenishment policy for the prefetch-on-consume path.
//!
//! Serving a cached bid leaves the cache empty for that ad unit, so the
//! coordinator eagerly fetches a replacement in the background. Whether
//! that eagerness should be throttled is placement-dependent (a hot ad
//! unit can otherwise cause continuous background fetching), so the policy
//! is injected rather than assumed.

use crate::adunit::AdUnitKey;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Decides whether consuming a bid for `key` should trigger a background
/// replenishment fetch.
pub trait ReplenishPolicy: Send + Sync {
    /// Whether to replenish `key` now. May record the attempt.
    fn should_replenish(&self, key: &AdUnitKey, now: DateTime<Utc>) -> bool;

    /// Human-readable description for logging.
    fn description(&self) -> &'static str;
}

/// Replenish on every consumption. Matches the historically observed
/// behavior and is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReplenish;

impl ReplenishPolicy for AlwaysReplenish {
    fn should_replenish(&self, _key: &AdUnitKey, _now: DateTime<Utc>) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "always"
    }
}

/// Never replenish: the next caller's cache miss triggers the fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverReplenish;

impl ReplenishPolicy for NeverReplenish {
    fn should_replenish(&self, _key: &AdUnitKey, _now: DateTime<Utc>) -> bool {
        false
    }

    fn description(&self) -> &'static str {
        "never"
    }
}

/// Replenish at most once per `min_interval` per ad unit.
///
/// The attempt ledger is advisory and lives outside the coordinator's
/// mutex; it does not participate in the ticket invariant.
pub struct CooldownReplenish {
    min_interval: Duration,
    last_attempt: DashMap<AdUnitKey, DateTime<Utc>>,
}

impl CooldownReplenish {
    /// Create a policy allowing one replenishment per key per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: DashMap::new(),
        }
    }
}

impl ReplenishPolicy for CooldownReplenish {
    fn should_replenish(&self, key: &AdUnitKey, now: DateTime<Utc>) -> bool {
        match self.last_attempt.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if now - *entry.get() < self.min_interval {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    fn description(&self) -> &'static str {
        "cooldown"
    }
}
