//! BidVault - client-side bid caching and prefetch orchestration
//!
//! This library is the core bidding engine of the BidVault mobile SDK:
//! it obtains priced bids from a remote auction endpoint, caches them with
//! TTL expiry, deduplicates in-flight fetches per ad unit, and gates all
//! network access behind user consent and a server-driven kill switch.
//!
//! # High-Level API
//!
//! For most use cases, the [`engine`] module provides the facade:
//!
//! ```ignore
//! use bidvault::adunit::{AdFormat, AdUnitKey};
//! use bidvault::engine::{BidEngine, EngineConfig};
//! use bidvault::gateway::{DeviceInfo, PublisherInfo};
//!
//! let config = EngineConfig::new(
//!     "https://bidder.example/cdb",
//!     PublisherInfo::new("com.example.app", "pub-42"),
//!     DeviceInfo::new(device_id, "android", "4.2.0"),
//! );
//! let engine = BidEngine::new(config, consent_storage)?;
//!
//! // Warm the cache for every registered ad unit, then consume on demand.
//! engine.prefetch_all(ad_units.clone());
//! let bid = engine.request_bid(&ad_units[0]).await;
//! ```

pub mod adunit;
pub mod bid;
pub mod cache;
pub mod config;
pub mod consent;
pub mod coordinator;
pub mod engine;
pub mod gateway;
pub mod ident;
pub mod logging;
pub mod time;

/// Version of the BidVault library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
