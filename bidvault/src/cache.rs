//! In-memory bid cache with TTL-based lazy expiry.
//!
//! Maps an [`AdUnitKey`] to the one cached [`Bid`] for that placement.
//! Expired entries are evicted on the next lookup that touches them; there
//! is no background sweep. The cache holds no lock of its own; it is only
//! ever called from inside the coordinator's synchronized region, which also
//! guards the ticket table (see the coordinator module).

use crate::adunit::AdUnitKey;
use crate::bid::Bid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Outcome of a [`BidCache::take`] lookup.
///
/// A silence entry is live for TTL purposes but never renderable, and the
/// coordinator must tell "known no-fill window, don't fetch" apart from
/// "nothing known, fetch", hence three outcomes rather than `Option<Bid>`.
#[derive(Debug, Clone, PartialEq)]
pub enum TakeResult {
    /// A live, renderable bid. The entry has been removed (consume-once).
    Hit(Bid),
    /// A live silence entry. Left in place so the no-fill window holds for
    /// its whole TTL.
    Silenced,
    /// Nothing cached, or the entry had expired (and was removed).
    Miss,
}

impl TakeResult {
    /// Returns the bid for a hit, `None` otherwise.
    pub fn into_bid(self) -> Option<Bid> {
        match self {
            TakeResult::Hit(bid) => Some(bid),
            TakeResult::Silenced | TakeResult::Miss => None,
        }
    }
}

/// In-memory store of cached bids, one per ad unit.
#[derive(Debug, Default)]
pub struct BidCache {
    entries: HashMap<AdUnitKey, Bid>,
}

impl BidCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert or replace the entry for `key`.
    ///
    /// Last write wins unconditionally; the coordinator's ticket invariant
    /// guarantees no two fetches race on the same key.
    pub fn put(&mut self, key: AdUnitKey, bid: Bid) {
        self.entries.insert(key, bid);
    }

    /// Atomically take the live bid for `key`, if any.
    ///
    /// - live renderable bid: removed and returned as [`TakeResult::Hit`];
    /// - live silence entry: left in place, [`TakeResult::Silenced`];
    /// - expired entry: removed as a side effect, [`TakeResult::Miss`];
    /// - no entry: [`TakeResult::Miss`].
    pub fn take(&mut self, key: &AdUnitKey, now: DateTime<Utc>) -> TakeResult {
        let Some(bid) = self.entries.get(key) else {
            return TakeResult::Miss;
        };

        if !bid.is_live(now) {
            self.entries.remove(key);
            return TakeResult::Miss;
        }

        if bid.is_silence() {
            return TakeResult::Silenced;
        }

        match self.entries.remove(key) {
            Some(bid) => TakeResult::Hit(bid),
            None => TakeResult::Miss,
        }
    }

    /// Number of entries currently held, expired or not. Diagnostics only.
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}
