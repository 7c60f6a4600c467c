//! Server-driven kill switch.
//!
//! The auction endpoint can instruct the SDK to suspend all bidding. The
//! flag starts out unknown and fails open: until a persisted value or a
//! server response says otherwise, bidding is permitted. Once known it never
//! becomes unknown again, and every update is persisted so the last
//! instruction survives a process restart.

use crate::config::{ConfigStorage, ConfigFileError};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unknown,
    Known(bool),
}

/// Process-wide kill-switch state.
pub struct KillSwitchConfig {
    state: RwLock<State>,
    storage: Arc<dyn ConfigStorage>,
}

impl KillSwitchConfig {
    /// Initialize from persisted storage.
    ///
    /// A persisted value is trusted at cold start until overwritten by a
    /// fresh server response; no persisted value means `Unknown`.
    pub fn load(storage: Arc<dyn ConfigStorage>) -> Self {
        let state = match storage.get_cached_kill_switch() {
            Some(enabled) => {
                debug!(enabled, "Kill switch restored from persisted config");
                State::Known(enabled)
            }
            None => State::Unknown,
        };
        Self {
            state: RwLock::new(state),
            storage,
        }
    }

    /// Whether bidding is currently suspended.
    ///
    /// `Unknown` fails open: bidding is permitted.
    pub fn is_enabled(&self) -> bool {
        match *self.state.read().unwrap() {
            State::Unknown => false,
            State::Known(enabled) => enabled,
        }
    }

    /// Whether a server or persisted value has ever been seen.
    pub fn is_known(&self) -> bool {
        matches!(*self.state.read().unwrap(), State::Known(_))
    }

    /// Apply a config update from a successful auction response and persist
    /// it.
    ///
    /// Persistence failures are logged and swallowed: losing the cached flag
    /// only costs one fail-open cold start, and no failure from this engine
    /// may surface to the caller.
    pub fn apply_update(&self, enabled: bool) {
        let previous = {
            let mut state = self.state.write().unwrap();
            let previous = *state;
            *state = State::Known(enabled);
            previous
        };

        if previous != State::Known(enabled) {
            debug!(enabled, "Kill switch updated from server response");
        }

        if let Err(e) = self.storage.put_cached_kill_switch(enabled) {
            warn!(error = %e, "Failed to persist kill switch");
        }
    }

    /// Persist the current known state explicitly. No-op while `Unknown`.
    pub fn persist(&self) -> Result<(), ConfigFileError> {
        match *self.state.read().unwrap() {
            State::Unknown => Ok(()),
            State::Known(enabled) => self.storage.put_cached_kill_switch(enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryStorage;

    #[test]
    fn test_unknown_fails_open() {
        let config = KillSwitchConfig::load(Arc::new(InMemoryStorage::new()));

        assert!(!config.is_known());
        assert!(!config.is_enabled(), "unknown state must permit bidding");
    }

    #[test]
    fn test_cold_start_trusts_persisted_value() {
        let storage = Arc::new(InMemoryStorage::with_kill_switch(true));
        let config = KillSwitchConfig::load(storage);

        assert!(config.is_known());
        assert!(config.is_enabled());
    }

    #[test]
    fn test_server_update_overrides_and_persists() {
        let storage = Arc::new(InMemoryStorage::with_kill_switch(true));
        let config = KillSwitchConfig::load(storage.clone());

        config.apply_update(false);

        assert!(!config.is_enabled());
        assert_eq!(storage.get_cached_kill_switch(), Some(false));
    }

    #[test]
    fn test_never_returns_to_unknown() {
        let config = KillSwitchConfig::load(Arc::new(InMemoryStorage::new()));

        config.apply_update(true);
        assert!(config.is_known());

        config.apply_update(false);
        assert!(config.is_known());
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_persist_is_noop_while_unknown() {
        let storage = Arc::new(InMemoryStorage::new());
        let config = KillSwitchConfig::load(storage.clone());

        config.persist().unwrap();
        assert_eq!(storage.get_cached_kill_switch(), None);
    }
}
