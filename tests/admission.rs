//! End-to-end admission tests against the in-process counter store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

use hostgate::ratelimit::{
    Clock, CounterBackend, CounterStore, ManualClock, MemoryCounterStore, RuleRegistry, StoreError,
};
use hostgate::{AdmissionController, HostgateError};

const AMFI_URL: &str =
    "https://portal.amfiindia.com/DownloadNAVHistoryReport_Po.aspx?frmdt=04-Sep-2007";
const NSE_URL: &str =
    "https://www1.nseindia.com/content/historical/EQUITIES/2021/OCT/cm14OCT2021bhav.csv.zip";
const UNGOVERNED_URL: &str =
    "https://republika.co.id/berita/r5fa6n370/jerman-kembangkan-vaksin-baru-untuk-hadapi-varian-virus-corona";

fn registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.add_rule("amfiindia.com", "1s", 2).unwrap();
    registry.add_rule("nseindia.com", "1s", 10_000).unwrap();
    registry
}

fn controller(store: Arc<MemoryCounterStore>, clock: &ManualClock) -> AdmissionController {
    AdmissionController::new(registry(), CounterBackend::Shared(store))
        .with_clock(Arc::new(clock.clone()))
}

/// Store whose every call fails.
struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Store whose calls never complete.
struct StalledStore;

#[async_trait]
impl CounterStore for StalledStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        std::future::pending().await
    }

    async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
        std::future::pending().await
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        std::future::pending().await
    }
}

/// Layer that records the level and message of every event.
#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CaptureLayer {
    fn messages_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

#[tokio::test]
async fn test_three_requests_in_one_second() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let controller = controller(Arc::new(MemoryCounterStore::new()), &clock);

    let mut decisions = Vec::new();
    for _ in 0..3 {
        decisions.push(assert_ok!(controller.is_limited(AMFI_URL).await));
    }
    assert_eq!(decisions, [false, false, true]);

    // The generous rule for the other host is unaffected
    assert!(!assert_ok!(controller.is_limited(NSE_URL).await));
}

#[tokio::test]
async fn test_limit_holds_for_rest_of_window() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let controller = controller(Arc::new(MemoryCounterStore::new()), &clock);

    assert!(!controller.is_limited(AMFI_URL).await.unwrap());
    assert!(!controller.is_limited(AMFI_URL).await.unwrap());

    clock.advance(Duration::from_millis(999));
    for _ in 0..5 {
        assert!(controller.is_limited(AMFI_URL).await.unwrap());
    }

    clock.advance(Duration::from_millis(1));
    assert!(!controller.is_limited(AMFI_URL).await.unwrap());
}

#[tokio::test]
async fn test_ungoverned_destination_is_admitted() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let store = Arc::new(MemoryCounterStore::new());
    let controller = controller(store.clone(), &clock);

    for _ in 0..50 {
        assert!(!controller.is_limited(UNGOVERNED_URL).await.unwrap());
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_missing_store_fails_open() {
    let controller = AdmissionController::new(registry(), CounterBackend::Unconfigured);

    for _ in 0..10 {
        assert!(!controller.is_limited(AMFI_URL).await.unwrap());
        assert_ok!(controller.admit(AMFI_URL).await);
    }
}

#[tokio::test]
async fn test_missing_store_emits_warning() {
    let capture = CaptureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let controller = AdmissionController::new(registry(), CounterBackend::Unconfigured);
    assert!(!controller.is_limited(AMFI_URL).await.unwrap());
    assert!(!controller.is_limited(AMFI_URL).await.unwrap());

    let warnings = capture.messages_at(Level::WARN);
    assert_eq!(warnings.len(), 2, "one warning per evaluation: {warnings:?}");
    assert!(warnings.iter().all(|m| m.contains("not configured")));

    // Ungoverned destinations never reach the fail-open path
    assert!(!controller.is_limited(UNGOVERNED_URL).await.unwrap());
    assert_eq!(capture.messages_at(Level::WARN).len(), 2);
}

#[tokio::test]
async fn test_configured_store_does_not_warn() {
    let capture = CaptureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let clock = ManualClock::at_unix(1_700_000_000);
    let controller = controller(Arc::new(MemoryCounterStore::new()), &clock);
    assert!(!controller.is_limited(AMFI_URL).await.unwrap());

    assert!(capture.messages_at(Level::WARN).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_bounds_store_calls() {
    let controller = AdmissionController::new(registry(), CounterBackend::Shared(Arc::new(StalledStore)))
        .with_call_timeout(Duration::from_secs(60));

    let started = Instant::now();
    let deadline = started + Duration::from_millis(200);
    let err = assert_err!(controller.is_limited_before(AMFI_URL, deadline).await);
    assert!(matches!(err, HostgateError::BackendDown(StoreError::Timeout(_))));
    assert!(err.is_denial());
    // The caller's deadline wins over the longer configured timeout
    assert!(Instant::now() - started < Duration::from_secs(1));

    // An ungoverned destination needs no store call, so even a passed deadline admits it
    assert!(!assert_ok!(controller.is_limited_before(UNGOVERNED_URL, started).await));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_check_is_cancelled() {
    let controller =
        AdmissionController::new(registry(), CounterBackend::Shared(Arc::new(StalledStore)));

    let check = controller.is_limited_before(AMFI_URL, Instant::now() + Duration::from_secs(60));
    let outcome = tokio::time::timeout(Duration::from_millis(10), check).await;
    assert!(outcome.is_err(), "the abandoned check never produced a decision");
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let controller =
        AdmissionController::new(registry(), CounterBackend::Shared(Arc::new(DownStore)));

    let err = assert_err!(controller.is_limited(AMFI_URL).await);
    assert!(matches!(err, HostgateError::BackendDown(_)));
    assert!(err.is_denial());

    let err = assert_err!(controller.admit(AMFI_URL).await);
    assert!(matches!(err, HostgateError::BackendDown(_)));

    // Ungoverned hosts never touch the store
    assert!(!controller.is_limited(UNGOVERNED_URL).await.unwrap());
}

#[tokio::test]
async fn test_corrupted_counter_fails_closed() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let store = Arc::new(MemoryCounterStore::new());
    let controller = controller(store.clone(), &clock);

    let rule = controller.registry().resolve(AMFI_URL).unwrap().unwrap();
    store.raw_set(&rule.bucket_key_at(clock.now()), "seventeen");

    let err = assert_err!(controller.is_limited(AMFI_URL).await);
    assert!(matches!(err, HostgateError::InvalidState { .. }));
}

#[tokio::test]
async fn test_registered_rule_is_resolved() {
    let mut registry = RuleRegistry::new();
    registry.add_rule("x.com", "1h", 5).unwrap();
    let controller = AdmissionController::new(registry, CounterBackend::Unconfigured);

    let rule = controller
        .registry()
        .resolve("https://x.com/search?q=rust")
        .unwrap()
        .unwrap();
    assert!(std::ptr::eq(rule, &controller.registry().rules()[0]));
    assert_eq!(rule.host_pattern(), "x.com");
    assert_eq!(rule.window(), Duration::from_secs(3600));
    assert_eq!(rule.limit(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_counter_expires_after_four_windows() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let store = Arc::new(MemoryCounterStore::new());
    let controller = controller(store.clone(), &clock);

    assert!(!controller.is_limited(AMFI_URL).await.unwrap());

    let rule = controller.registry().resolve(AMFI_URL).unwrap().unwrap();
    let key = rule.bucket_key_at(clock.now());
    assert_eq!(store.ttl(&key), Some(Duration::from_secs(4)));

    tokio::time::advance(Duration::from_millis(3_999)).await;
    assert!(store.contains(&key));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(!store.contains(&key));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_quota() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let store = Arc::new(MemoryCounterStore::new());

    let mut registry = RuleRegistry::new();
    registry.add_rule("example.com", "1m", 5).unwrap();
    let controller = AdmissionController::new(registry, CounterBackend::Shared(store))
        .with_clock(Arc::new(clock));

    let handles = (0..50).map(|i| {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller
                .is_limited(&format!("https://api.example.com/items/{i}"))
                .await
        })
    });

    let admitted = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|limited| !limited)
        .count();
    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_separate_controllers_share_store() {
    let clock = ManualClock::at_unix(1_700_000_000);
    let store = Arc::new(MemoryCounterStore::new());
    let first = controller(store.clone(), &clock);
    let second = controller(store, &clock);

    assert!(!first.is_limited(AMFI_URL).await.unwrap());
    assert!(!second.is_limited(AMFI_URL).await.unwrap());
    assert!(first.is_limited(AMFI_URL).await.unwrap());
    assert!(second.is_limited(AMFI_URL).await.unwrap());
}
