//! Ad unit identity types.
//!
//! An [`AdUnitKey`] names one placement a publisher wants to fill and is the
//! key for every cache and ticket lookup in the engine. Equality is
//! structural: two keys with the same placement, size and format are the same
//! placement regardless of where they were constructed.

use std::fmt;

/// Rendering format of an ad placement.
///
/// Format-specific rendering lives entirely outside this engine; the cache
/// and coordinator consume the tag uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdFormat {
    /// Inline banner of a fixed pixel size.
    Banner,
    /// Full-screen interstitial.
    Interstitial,
    /// Native ad assembled by the publisher from a structured payload.
    Native,
    /// Rewarded full-screen ad.
    Rewarded,
}

impl AdFormat {
    /// Wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdFormat::Banner => "banner",
            AdFormat::Interstitial => "interstitial",
            AdFormat::Native => "native",
            AdFormat::Rewarded => "rewarded",
        }
    }
}

impl fmt::Display for AdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one ad placement: the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdUnitKey {
    /// Publisher-assigned placement identifier.
    pub placement_id: String,
    /// Requested width in device pixels.
    pub width: u32,
    /// Requested height in device pixels.
    pub height: u32,
    /// Rendering format of the placement.
    pub format: AdFormat,
}

impl AdUnitKey {
    /// Create a new ad unit key.
    pub fn new(placement_id: impl Into<String>, width: u32, height: u32, format: AdFormat) -> Self {
        Self {
            placement_id: placement_id.into(),
            width,
            height,
            format,
        }
    }
}

impl fmt::Display for AdUnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} {}",
            self.placement_id, self.width, self.height, self.format
        )
    }
}
