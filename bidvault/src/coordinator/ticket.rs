//! In-flight fetch tickets.
//!
//! A ticket exists for an ad unit from the moment a fetch is dispatched
//! until its outcome (success or failure) has been applied to the cache.
//! At most one ticket exists per key at any instant; every concurrent
//! request for the same key subscribes to the existing ticket instead of
//! triggering a second network call.
//!
//! The table itself is not synchronized: it lives inside the coordinator's
//! mutex, next to the cache it guards.

use crate::adunit::AdUnitKey;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// A ticket completes exactly once, so the smallest channel suffices.
/// Waiters also wake when the sender is dropped without sending.
const COMPLETION_CAPACITY: usize = 1;

/// Outcome of registering interest in a fetch for one key.
pub enum TicketRegistration {
    /// No fetch was in flight: a ticket has been opened and the caller now
    /// owns dispatching the fetch. The receiver fires when it completes.
    Opened(broadcast::Receiver<()>),
    /// A fetch is already in flight: wait on the receiver, then re-check
    /// the cache.
    Joined(broadcast::Receiver<()>),
}

impl TicketRegistration {
    /// Whether this registration opened a new ticket.
    pub fn is_opened(&self) -> bool {
        matches!(self, TicketRegistration::Opened(_))
    }

    /// The completion receiver, regardless of who owns the fetch.
    pub fn into_receiver(self) -> broadcast::Receiver<()> {
        match self {
            TicketRegistration::Opened(rx) | TicketRegistration::Joined(rx) => rx,
        }
    }
}

/// Table of in-flight fetches, one ticket per ad unit.
#[derive(Debug, Default)]
pub struct TicketTable {
    in_flight: HashMap<AdUnitKey, broadcast::Sender<()>>,
}

impl TicketTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a fetch for `key`.
    ///
    /// The entry API makes check-and-insert atomic with respect to the
    /// enclosing lock, so exactly one caller ever sees `Opened`.
    pub fn register(&mut self, key: AdUnitKey) -> TicketRegistration {
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => TicketRegistration::Joined(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(COMPLETION_CAPACITY);
                entry.insert(tx);
                TicketRegistration::Opened(rx)
            }
        }
    }

    /// Open tickets for every key that has none, returning the keys that
    /// were actually opened. Keys already in flight are skipped, which is
    /// the dedup rule for prefetch and replenishment paths.
    pub fn open_many(&mut self, keys: impl IntoIterator<Item = AdUnitKey>) -> Vec<AdUnitKey> {
        keys.into_iter()
            .filter(|key| match self.in_flight.entry(key.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    let (tx, _rx) = broadcast::channel(COMPLETION_CAPACITY);
                    entry.insert(tx);
                    true
                }
            })
            .collect()
    }

    /// Close the ticket for `key`, waking every waiter.
    ///
    /// Called after the fetch outcome has been applied to the cache (or
    /// discarded, on failure). A missing ticket is a no-op.
    pub fn close(&mut self, key: &AdUnitKey) {
        if let Some(tx) = self.in_flight.remove(key) {
            // Waiters that subscribed before this send all receive it;
            // send errors just mean nobody was waiting.
            let _ = tx.send(());
        }
    }

    /// Close every ticket. Used at shutdown so no waiter is left pending.
    pub fn close_all(&mut self) {
        for (_, tx) in self.in_flight.drain() {
            let _ = tx.send(());
        }
    }

    /// Whether a ticket exists for `key`.
    pub fn contains(&self, key: &AdUnitKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of in-flight tickets.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether no fetch is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adunit::AdFormat;

    fn key(placement: &str) -> AdUnitKey {
        AdUnitKey::new(placement, 320, 50, AdFormat::Banner)
    }

    #[test]
    fn test_first_registration_opens() {
        let mut table = TicketTable::new();
        assert!(table.register(key("a")).is_opened());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_second_registration_joins() {
        let mut table = TicketTable::new();
        let first = table.register(key("a"));
        let second = table.register(key("a"));

        assert!(first.is_opened());
        assert!(!second.is_opened());
        assert_eq!(table.len(), 1, "joining must not open a second ticket");
    }

    #[test]
    fn test_different_keys_open_independently() {
        let mut table = TicketTable::new();
        assert!(table.register(key("a")).is_opened());
        assert!(table.register(key("b")).is_opened());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_close_allows_reopening() {
        let mut table = TicketTable::new();
        let _first = table.register(key("a"));

        table.close(&key("a"));
        assert!(table.is_empty());
        assert!(table.register(key("a")).is_opened());
    }

    #[test]
    fn test_close_unknown_key_is_noop() {
        let mut table = TicketTable::new();
        table.close(&key("missing"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_open_many_skips_in_flight_keys() {
        let mut table = TicketTable::new();
        let _existing = table.register(key("a"));

        let opened = table.open_many(vec![key("a"), key("b"), key("c")]);

        assert_eq!(opened, vec![key("b"), key("c")]);
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let mut table = TicketTable::new();
        let _owner = table.register(key("a"));
        let mut rx = table.register(key("a")).into_receiver();

        table.close(&key("a"));

        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_all_wakes_every_waiter() {
        let mut table = TicketTable::new();
        let _a = table.register(key("a"));
        let _b = table.register(key("b"));
        let mut rx_a = table.register(key("a")).into_receiver();
        let mut rx_b = table.register(key("b")).into_receiver();

        table.close_all();

        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.recv().await.is_ok());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_table_wakes_waiters_with_error() {
        let mut table = TicketTable::new();
        let _owner = table.register(key("a"));
        let mut rx = table.register(key("a")).into_receiver();

        drop(table);

        // Closed channel, not a hang: waiters treat this like completion.
        assert!(rx.recv().await.is_err());
    }
}
