//! Consent gating for all network access.
//!
//! Consent storage is owned by the host app (GDPR/CCPA/mediation flags are
//! parsed and stored upstream); this engine only asks one question before
//! touching the network. A denied gate is a legitimate "no bid", never a
//! failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Read-only view onto externally-owned consent storage.
pub trait ConsentStorage: Send + Sync {
    /// Whether the user has consented to bidding-related network access.
    fn is_bidding_consent_given(&self) -> bool;
}

/// Gate consulted before every fetch decision.
#[derive(Clone)]
pub struct ConsentGate {
    storage: Arc<dyn ConsentStorage>,
}

impl ConsentGate {
    /// Create a gate over the given storage.
    pub fn new(storage: Arc<dyn ConsentStorage>) -> Self {
        Self { storage }
    }

    /// Whether bidding is currently permitted.
    ///
    /// Reads storage on every call: consent can be granted or withdrawn at
    /// any point in the process lifetime.
    pub fn allows_bidding(&self) -> bool {
        self.storage.is_bidding_consent_given()
    }
}

/// Consent storage holding a single in-process flag.
///
/// Useful for tests and for hosts that resolve consent once at startup.
#[derive(Debug)]
pub struct StaticConsent {
    given: AtomicBool,
}

impl StaticConsent {
    /// Create storage with the given initial answer.
    pub fn new(given: bool) -> Self {
        Self {
            given: AtomicBool::new(given),
        }
    }

    /// Update the stored answer.
    pub fn set(&self, given: bool) {
        self.given.store(given, Ordering::SeqCst);
    }
}

impl ConsentStorage for StaticConsent {
    fn is_bidding_consent_given(&self) -> bool {
        self.given.load(Ordering::SeqCst)
    }
}
