//! BidVault CLI - Command-line diagnostics for the bidding engine
//!
//! This binary exercises the bidding engine against a real (or stub)
//! auction endpoint: it optionally warms the cache for a set of ad units,
//! requests one bid, and prints the outcome plus the engine counters.

mod error;

use clap::{Parser, ValueEnum};
use error::CliError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use bidvault::adunit::{AdFormat, AdUnitKey};
use bidvault::consent::StaticConsent;
use bidvault::engine::{BidEngine, EngineConfig};
use bidvault::gateway::{DeviceInfo, PublisherInfo};
use bidvault::logging::{default_log_dir, default_log_file, init_logging};

#[derive(Debug, Clone, ValueEnum)]
enum FormatArg {
    /// Inline banner of a fixed pixel size
    Banner,
    /// Full-screen interstitial
    Interstitial,
    /// Native ad with a structured payload
    Native,
    /// Rewarded full-screen ad
    Rewarded,
}

impl From<FormatArg> for AdFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Banner => AdFormat::Banner,
            FormatArg::Interstitial => AdFormat::Interstitial,
            FormatArg::Native => AdFormat::Native,
            FormatArg::Rewarded => AdFormat::Rewarded,
        }
    }
}

#[derive(Parser)]
#[command(name = "bidvault")]
#[command(about = "Request bids from an auction endpoint", long_about = None)]
struct Args {
    /// Auction endpoint URL
    #[arg(long)]
    endpoint: String,

    /// Placement identifier to request a bid for
    #[arg(long)]
    placement: String,

    /// Placement width in pixels
    #[arg(long, default_value = "320")]
    width: u32,

    /// Placement height in pixels
    #[arg(long, default_value = "50")]
    height: u32,

    /// Ad format of the placement
    #[arg(long, value_enum, default_value = "banner")]
    format: FormatArg,

    /// Application bundle identifier
    #[arg(long, default_value = "com.bidvault.cli")]
    bundle_id: String,

    /// Publisher account identifier
    #[arg(long, default_value = "cli-publisher")]
    publisher_id: String,

    /// Device identifier sent with requests
    #[arg(long, default_value = "cli-device")]
    device_id: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Additional placements to warm the cache for before requesting
    #[arg(long, value_delimiter = ',')]
    warm: Vec<String>,

    /// Run without bidding consent (the request must resolve with no bid)
    #[arg(long)]
    no_consent: bool,

    /// Persisted config file path (defaults to ~/.bidvault/config.ini)
    #[arg(long)]
    config_file: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        e.exit();
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let _guard = init_logging(default_log_dir(), default_log_file())
        .map_err(CliError::LoggingInit)?;

    if args.width == 0 || args.height == 0 {
        return Err(CliError::Config(
            "width and height must be positive".to_string(),
        ));
    }

    let mut config = EngineConfig::new(
        args.endpoint.clone(),
        PublisherInfo::new(args.bundle_id.clone(), args.publisher_id.clone()),
        DeviceInfo::new(args.device_id.clone(), std::env::consts::OS, bidvault::VERSION),
    )
    .with_request_timeout_secs(args.timeout);
    if let Some(path) = &args.config_file {
        config = config.with_config_path(path);
    }

    let consent = Arc::new(StaticConsent::new(!args.no_consent));
    let engine = BidEngine::new(config, consent)?;
    info!(endpoint = %args.endpoint, "CLI engine ready");

    let key = AdUnitKey::new(
        args.placement.clone(),
        args.width,
        args.height,
        args.format.clone().into(),
    );

    println!("Requesting bid from {}", args.endpoint);
    println!("  Placement: {}", key);
    println!("  Consent:   {}", if args.no_consent { "denied" } else { "given" });
    println!();

    if !args.warm.is_empty() {
        let warm_keys: Vec<AdUnitKey> = args
            .warm
            .iter()
            .map(|placement| {
                AdUnitKey::new(placement.clone(), args.width, args.height, args.format.clone().into())
            })
            .collect();
        println!("Warming cache for {} additional placement(s)...", warm_keys.len());
        engine.prefetch_all(warm_keys);

        // Give the background fetches a moment to land.
        for _ in 0..100 {
            if engine.in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        println!("Cache now holds {} entr(ies)", engine.cache_size());
        println!();
    }

    match engine.request_bid(&key).await {
        Some(bid) => {
            println!("Bid received:");
            println!("  CPM:        {} {}", bid.cpm, bid.currency);
            println!("  Size:       {}x{}", bid.width_px, bid.height_px);
            println!("  TTL:        {}s", bid.ttl_seconds);
            println!("  Impression: {}", bid.impression_id);
        }
        None => {
            println!("No bid.");
            if engine.is_suspended() {
                println!("(bidding is currently suspended by the server kill switch)");
            }
        }
    }

    let stats = engine.stats();
    println!();
    println!("Engine counters:");
    println!("  requests: {}  cache hits: {}  silenced: {}", stats.requests, stats.cache_hits, stats.silenced);
    println!("  fetches: {}  failures: {}  bids cached: {}", stats.fetches, stats.fetch_failures, stats.bids_cached);
    if let Some(seconds) = stats.last_retry_after_seconds {
        println!("  server asked to back off for {}s", seconds);
    }

    engine.shutdown().await;
    Ok(())
}
