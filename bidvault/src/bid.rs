//! Priced auction results.
//!
//! A [`Bid`] is what the auction endpoint returns for one ad unit: a price,
//! a renderable payload and a time-to-live. A bid with a zero CPM is a
//! *silence* entry: the server's explicit "no fill, and don't ask again
//! until the TTL runs out". Silence entries are cached like real bids but
//! never handed to rendering code.

use chrono::{DateTime, Duration, Utc};

/// TTL substituted for real bids that arrive with `ttl = 0`.
///
/// Silence entries keep their literal TTL: a zero-TTL silence is an
/// immediately-expired no-bid rather than a 15-minute block.
pub const DEFAULT_BID_TTL_SECS: u64 = 900;

/// Renderable content of a bid.
#[derive(Debug, Clone, PartialEq)]
pub enum BidPayload {
    /// URL of the display creative to load in a WebView.
    Display(String),
    /// Structured native-ad assets, passed through opaquely.
    Native(serde_json::Value),
}

/// One priced result from the auction endpoint.
///
/// Owned by the cache from insertion until it is consumed by a `take` or
/// lazily evicted on expiry; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    /// Price as a decimal string, exactly as the server sent it. `"0"`
    /// marks a silence entry.
    pub cpm: String,
    /// ISO currency code of the CPM.
    pub currency: String,
    /// Creative payload. `None` for silence entries.
    pub payload: Option<BidPayload>,
    /// Creative width in pixels.
    pub width_px: u32,
    /// Creative height in pixels.
    pub height_px: u32,
    /// Lifetime in seconds from `received_at`.
    pub ttl_seconds: u64,
    /// When the bid was received from the server.
    pub received_at: DateTime<Utc>,
    /// Identifier correlating this bid with its slot request.
    pub impression_id: String,
}

impl Bid {
    /// Parsed numeric CPM, or `None` if the server sent something that is
    /// not a decimal number.
    pub fn cpm_value(&self) -> Option<f64> {
        self.cpm.trim().parse::<f64>().ok()
    }

    /// Whether this is a silence entry (explicit no-bid with a back-off TTL).
    pub fn is_silence(&self) -> bool {
        matches!(self.cpm_value(), Some(v) if v <= 0.0)
    }

    /// The instant this bid stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.received_at + Duration::seconds(self.ttl_seconds as i64)
    }

    /// Whether the TTL has not yet run out at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }

    /// Whether this bid may be handed to rendering code at `now`.
    ///
    /// Silence entries are live for TTL purposes but never renderable.
    pub fn is_renderable(&self, now: DateTime<Utc>) -> bool {
        self.is_live(now) && !self.is_silence()
    }
}
