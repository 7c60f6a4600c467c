//! Integration tests for the bid engine.
//!
//! These tests drive the full stack (engine facade, coordinator, cache,
//! CDB gateway and wire format) against a stub auction endpoint that
//! parses the real request JSON and echoes impression ids, the way the
//! production backend does.
//!
//! Run with: `cargo test --test engine_integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

use bidvault::adunit::{AdFormat, AdUnitKey};
use bidvault::config::{ConfigStorage, InMemoryStorage};
use bidvault::consent::StaticConsent;
use bidvault::coordinator::{AlwaysReplenish, NeverReplenish, ReplenishPolicy};
use bidvault::engine::{BidEngine, EngineConfig};
use bidvault::gateway::{
    AsyncHttpClient, CdbGateway, DeviceInfo, GatewayConfig, GatewayError, PublisherInfo,
};
use bidvault::ident::{IdGenerator, SeededRandom};
use bidvault::time::{Clock, FixedClock};

const EPOCH: i64 = 1_700_000_000;

// ============================================================================
// Stub auction endpoint
// ============================================================================

/// What the stub endpoint answers with.
#[derive(Debug, Clone)]
enum Answer {
    /// Fill every requested slot at this CPM and TTL.
    Fill { cpm: &'static str, ttl: u64 },
    /// Explicit no-bid for every slot: cpm 0 with a silence TTL.
    NoFill { ttl: u64 },
    /// Non-2xx status.
    Status(u16),
    /// A body that is not an auction response.
    Garbage,
}

/// Stub CDB server: parses the request body and answers each slot by
/// echoing its impression id.
struct StubCdb {
    calls: AtomicUsize,
    delay: Option<Duration>,
    answer: Mutex<Answer>,
    kill_switch: Mutex<Option<bool>>,
}

impl StubCdb {
    fn new(answer: Answer) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: None,
            answer: Mutex::new(answer),
            kill_switch: Mutex::new(None),
        })
    }

    fn with_delay(answer: Answer, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            answer: Mutex::new(answer),
            kill_switch: Mutex::new(None),
        })
    }

    fn set_answer(&self, answer: Answer) {
        *self.answer.lock().unwrap() = answer;
    }

    fn set_kill_switch(&self, enabled: Option<bool>) {
        *self.kill_switch.lock().unwrap() = enabled;
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, json_body: &str) -> Result<Vec<u8>, GatewayError> {
        let answer = self.answer.lock().unwrap().clone();
        let request: serde_json::Value = serde_json::from_str(json_body).expect("request is JSON");
        let slots = request["slots"].as_array().expect("request has slots");

        let response_slots: Vec<serde_json::Value> = match answer {
            Answer::Fill { cpm, ttl } => slots
                .iter()
                .map(|slot| {
                    serde_json::json!({
                        "impressionId": slot["impressionId"],
                        "placementId": slot["placementId"],
                        "cpm": cpm,
                        "currency": "USD",
                        "width": slot["width"],
                        "height": slot["height"],
                        "ttl": ttl,
                        "displayUrl": "https://cdn.example/creative"
                    })
                })
                .collect(),
            Answer::NoFill { ttl } => slots
                .iter()
                .map(|slot| {
                    serde_json::json!({
                        "impressionId": slot["impressionId"],
                        "placementId": slot["placementId"],
                        "cpm": "0",
                        "ttl": ttl
                    })
                })
                .collect(),
            Answer::Status(code) => return Err(GatewayError::ErrorStatus(code)),
            Answer::Garbage => return Ok(b"<html>502 Bad Gateway</html>".to_vec()),
        };

        let mut body = serde_json::json!({ "slots": response_slots });
        if let Some(enabled) = *self.kill_switch.lock().unwrap() {
            body["config"] = serde_json::json!({ "killSwitch": enabled });
        }

        Ok(body.to_string().into_bytes())
    }
}

impl AsyncHttpClient for StubCdb {
    fn post_json(
        &self,
        _url: &str,
        json_body: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, GatewayError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.respond(json_body);
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: BidEngine,
    stub: Arc<StubCdb>,
    consent: Arc<StaticConsent>,
    clock: Arc<FixedClock>,
    storage: Arc<InMemoryStorage>,
}

fn harness(stub: Arc<StubCdb>, policy: Box<dyn ReplenishPolicy>) -> Harness {
    harness_with_storage(stub, policy, Arc::new(InMemoryStorage::new()))
}

fn harness_with_storage(
    stub: Arc<StubCdb>,
    policy: Box<dyn ReplenishPolicy>,
    storage: Arc<InMemoryStorage>,
) -> Harness {
    let clock = Arc::new(FixedClock::at_unix(EPOCH));
    let consent = Arc::new(StaticConsent::new(true));

    let gateway_ids = Arc::new(IdGenerator::new(
        clock.clone() as Arc<dyn Clock>,
        Box::new(SeededRandom::new(99)),
    ));
    let gateway = Arc::new(CdbGateway::new(
        GatewayConfig::new("https://cdb.example/bid"),
        StubClient(stub.clone()),
        gateway_ids,
        clock.clone() as Arc<dyn Clock>,
    ));

    let config = EngineConfig::new(
        "https://cdb.example/bid",
        PublisherInfo::new("com.example.app", "pub-42"),
        DeviceInfo::new("device-1", "android", "4.2.0"),
    );

    let engine = BidEngine::builder(config, consent.clone())
        .with_clock(clock.clone() as Arc<dyn Clock>)
        .with_random(Box::new(SeededRandom::new(7)))
        .with_config_storage(storage.clone())
        .with_gateway(gateway)
        .with_replenish_policy(policy)
        .build()
        .expect("engine builds");

    Harness {
        engine,
        stub,
        consent,
        clock,
        storage,
    }
}

/// Newtype so the shared stub can implement the client trait by reference.
#[derive(Clone)]
struct StubClient(Arc<StubCdb>);

impl AsyncHttpClient for StubClient {
    fn post_json(
        &self,
        url: &str,
        json_body: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, GatewayError>> + Send {
        self.0.post_json(url, json_body)
    }
}

fn banner(placement: &str) -> AdUnitKey {
    AdUnitKey::new(placement, 320, 50, AdFormat::Banner)
}

/// Wait until all background fetches settle.
async fn settle(engine: &BidEngine) {
    for _ in 0..200 {
        if engine.in_flight_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("background fetches did not settle");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_cold_cache_fetches_resolves_and_consumes() {
    let h = harness(
        StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 }),
        Box::new(NeverReplenish),
    );
    let key = banner("home");

    // Cold cache, consent granted, kill switch off: exactly one fetch.
    let bid = h.engine.request_bid(&key).await.expect("bid resolves");
    assert_eq!(bid.cpm, "1.50");
    assert_eq!(bid.ttl_seconds, 900);
    assert_eq!(h.stub.call_count(), 1);

    // The bid was consumed: an immediate second call misses and refetches.
    let second = h.engine.request_bid(&key).await.expect("second bid resolves");
    assert_eq!(second.cpm, "1.50");
    assert_eq!(h.stub.call_count(), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_http_500_degrades_to_no_bid() {
    let h = harness(StubCdb::new(Answer::Status(500)), Box::new(NeverReplenish));
    let key = banner("home");

    let bid = h.engine.request_bid(&key).await;

    assert!(bid.is_none());
    assert_eq!(h.engine.cache_size(), 0, "failed fetch must not touch the cache");
    assert_eq!(h.stub.call_count(), 1);
    assert_eq!(h.engine.stats().fetch_failures, 1);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_garbage_body_degrades_to_no_bid() {
    let h = harness(StubCdb::new(Answer::Garbage), Box::new(NeverReplenish));

    let bid = h.engine.request_bid(&banner("home")).await;

    assert!(bid.is_none());
    assert_eq!(h.engine.cache_size(), 0);
    assert_eq!(h.engine.stats().fetch_failures, 1);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_silence_window_is_respected() {
    let h = harness(
        StubCdb::new(Answer::NoFill { ttl: 300 }),
        Box::new(NeverReplenish),
    );
    let key = banner("home");

    // First call fetches and stores the silence entry.
    assert!(h.engine.request_bid(&key).await.is_none());
    assert_eq!(h.stub.call_count(), 1);
    assert_eq!(h.engine.cache_size(), 1);

    // Repeated calls inside the window never hit the network.
    for advance in [10, 100, 150] {
        h.clock.advance(chrono::Duration::seconds(advance));
        assert!(h.engine.request_bid(&key).await.is_none());
        assert_eq!(h.stub.call_count(), 1);
    }

    // Past the window the engine fetches again.
    h.clock.advance(chrono::Duration::seconds(100));
    assert!(h.engine.request_bid(&key).await.is_none());
    assert_eq!(h.stub.call_count(), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_consent_denied_never_touches_network_or_cache() {
    let h = harness(
        StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 }),
        Box::new(AlwaysReplenish),
    );
    h.consent.set(false);

    assert!(h.engine.request_bid(&banner("home")).await.is_none());
    h.engine.prefetch_all(vec![banner("home"), banner("footer")]);
    settle(&h.engine).await;

    assert_eq!(h.stub.call_count(), 0);
    assert_eq!(h.engine.cache_size(), 0);

    // Consent granted later: bidding resumes without reconstruction.
    h.consent.set(true);
    assert!(h.engine.request_bid(&banner("home")).await.is_some());

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_kill_switch_from_response_suspends_and_persists() {
    let stub = StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 });
    stub.set_kill_switch(Some(true));
    let h = harness(stub, Box::new(NeverReplenish));
    let key = banner("home");

    // The response both fills and flips the switch; the fill still lands.
    assert!(h.engine.request_bid(&key).await.is_some());
    assert!(h.engine.is_suspended());

    // Suspended: no further network access.
    assert!(h.engine.request_bid(&key).await.is_none());
    assert_eq!(h.stub.call_count(), 1);

    // The instruction was persisted for the next cold start.
    assert_eq!(h.storage.get_cached_kill_switch(), Some(true));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_persisted_kill_switch_suspends_cold_start() {
    let h = harness_with_storage(
        StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 }),
        Box::new(NeverReplenish),
        Arc::new(InMemoryStorage::with_kill_switch(true)),
    );

    assert!(h.engine.is_suspended());
    assert!(h.engine.request_bid(&banner("home")).await.is_none());
    assert_eq!(h.stub.call_count(), 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_kill_switch_lifts_after_fresh_response() {
    let storage = Arc::new(InMemoryStorage::with_kill_switch(false));
    let stub = StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 });
    stub.set_kill_switch(Some(false));
    let h = harness_with_storage(stub, Box::new(NeverReplenish), storage);

    assert!(!h.engine.is_suspended());
    assert!(h.engine.request_bid(&banner("home")).await.is_some());
    assert!(!h.engine.is_suspended());

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_prefetch_warms_cache_for_all_units() {
    let h = harness(
        StubCdb::new(Answer::Fill { cpm: "2.00", ttl: 900 }),
        Box::new(NeverReplenish),
    );
    let keys = vec![banner("home"), banner("footer"), banner("sidebar")];

    h.engine.prefetch_all(keys.clone());
    settle(&h.engine).await;

    // Three units fit one batch: a single network call warmed everything.
    assert_eq!(h.stub.call_count(), 1);
    assert_eq!(h.engine.cache_size(), 3);

    // Consumption is now served from cache with no further fetch.
    for key in &keys {
        assert!(h.engine.request_bid(key).await.is_some());
    }
    assert_eq!(h.stub.call_count(), 1);
    assert_eq!(h.engine.stats().cache_hits, 3);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_consume_triggers_background_replenishment() {
    let h = harness(
        StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 900 }),
        Box::new(AlwaysReplenish),
    );
    let key = banner("home");

    h.engine.prefetch_all(vec![key.clone()]);
    settle(&h.engine).await;
    assert_eq!(h.stub.call_count(), 1);

    // Consuming the cached bid refills the cache in the background.
    assert!(h.engine.request_bid(&key).await.is_some());
    settle(&h.engine).await;

    assert_eq!(h.stub.call_count(), 2);
    assert_eq!(h.engine.cache_size(), 1);
    assert_eq!(h.engine.stats().replenishments, 1);

    // The replenished bid serves the next call instantly.
    assert!(h.engine.request_bid(&key).await.is_some());
    assert_eq!(h.engine.stats().cache_hits, 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_cold_requests_coalesce_into_one_fetch() {
    let h = harness(
        StubCdb::with_delay(Answer::Fill { cpm: "1.50", ttl: 900 }, Duration::from_millis(50)),
        Box::new(NeverReplenish),
    );
    let key = banner("home");
    let engine = Arc::new(h.engine);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let key = key.clone();
            tokio::spawn(async move { engine.request_bid(&key).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(h.stub.call_count(), 1, "racing callers must share one fetch");
    assert_eq!(
        results.iter().filter(|r| r.is_some()).count(),
        1,
        "one auction win is consumed exactly once"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_expired_prefetched_bid_is_refetched() {
    let h = harness(
        StubCdb::new(Answer::Fill { cpm: "1.50", ttl: 60 }),
        Box::new(NeverReplenish),
    );
    let key = banner("home");

    h.engine.prefetch_all(vec![key.clone()]);
    settle(&h.engine).await;
    assert_eq!(h.engine.cache_size(), 1);

    h.clock.advance(chrono::Duration::seconds(61));

    // The expired entry is lazily evicted and a fresh fetch answers.
    let bid = h.engine.request_bid(&key).await.expect("fresh bid");
    let now: DateTime<Utc> = h.clock.now();
    assert!(bid.is_renderable(now));
    assert_eq!(h.stub.call_count(), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_recovery_after_transient_failure() {
    let stub = StubCdb::new(Answer::Status(503));
    let h = harness(stub, Box::new(NeverReplenish));
    let key = banner("home");

    assert!(h.engine.request_bid(&key).await.is_none());
    assert_eq!(h.engine.stats().fetch_failures, 1);

    // Endpoint recovers; the next request retries because no ticket and no
    // cache entry were left behind.
    h.stub.set_answer(Answer::Fill { cpm: "3.00", ttl: 900 });
    let bid = h.engine.request_bid(&key).await.expect("recovered");
    assert_eq!(bid.cpm, "3.00");

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_with_hung_endpoint_resolves_waiters() {
    let h = harness(
        StubCdb::with_delay(Answer::Fill { cpm: "1.50", ttl: 900 }, Duration::from_secs(3600)),
        Box::new(NeverReplenish),
    );
    let engine = Arc::new(h.engine);
    let key = banner("home");

    let waiter = {
        let engine = Arc::clone(&engine);
        let key = key.clone();
        tokio::spawn(async move { engine.request_bid(&key).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;

    let resolved = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must not hang across shutdown")
        .unwrap();
    assert!(resolved.is_none());
}
