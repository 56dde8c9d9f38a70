//! Sweep and refresh tests against the in-memory store and a scripted
//! adapter that replays canned fetch outcomes per URL.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use wsdb_audit::{
    refresh_by_url, refresh_listing, AuditError, AuditScheduler, ListingStore,
    MemoryListingStore, PlatformCounts, RefreshOutcome, StoredListing,
};
use wsdb_core::{ClassificationConfig, DetailRecord, ListingStub, QualityClass};
use wsdb_scraper::{
    normalize, AdapterRegistry, DetailFetch, DetailOptions, FailureKind, PlatformAdapter,
    RawDetail, RawTier, ScraperError, SearchOptions,
};

// ---------------------------------------------------------------------------
// scripted adapter
// ---------------------------------------------------------------------------

type Outcome = Result<RawDetail, FailureKind>;
type FetchHook = Box<dyn FnOnce() + Send>;

struct ScriptedAdapter {
    id: &'static str,
    script: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<(String, DetailOptions)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    on_fetch: Mutex<Option<FetchHook>>,
}

impl ScriptedAdapter {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            on_fetch: Mutex::new(None),
        }
    }

    /// Runs `hook` once, during the next fetch.
    fn on_next_fetch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_fetch.lock().unwrap() = Some(Box::new(hook));
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(&self, url: &str, outcome: Outcome) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_owned())
            .or_default()
            .push_back(outcome);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn called_urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        self.id
    }

    async fn search_listings(&self, _: &str, _: usize, _: &SearchOptions) -> Vec<ListingStub> {
        Vec::new()
    }

    async fn fetch_detail(&self, url: &str, options: &DetailOptions) -> DetailFetch {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_owned(), options.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let hook = self.on_fetch.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(FailureKind::Permanent));
        match outcome {
            Ok(raw) => DetailFetch {
                raw: Some(raw),
                failure: None,
                attempts: Vec::new(),
            },
            Err(kind) => DetailFetch {
                raw: None,
                failure: Some(kind),
                attempts: Vec::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

fn url(n: i64) -> String {
    format!("https://www.dhgate.com/product/glass-jar/{n}.html")
}

fn stub(platform: &str, n: i64) -> ListingStub {
    ListingStub::bare(platform, &url(n))
}

fn title_only() -> RawDetail {
    RawDetail {
        title: Some("Glass Storage Jar".to_owned()),
        ..RawDetail::default()
    }
}

fn rich(attributes: usize) -> RawDetail {
    RawDetail {
        title: Some("Glass Storage Jar 500ml".to_owned()),
        price_tiers: vec![
            RawTier {
                min: 2,
                max: Some(99),
                price_text: "$1.20".to_owned(),
            },
            RawTier {
                min: 100,
                max: None,
                price_text: "$0.95".to_owned(),
            },
        ],
        attributes: (0..attributes)
            .map(|i| (format!("Label {i}"), format!("Value {i}")))
            .collect(),
        supplier_name: Some("Ningbo Glassware Co.".to_owned()),
        hero_image: Some("https://img.dhgate.com/jar.jpg".to_owned()),
        ..RawDetail::default()
    }
}

fn detail_for(platform: &str, n: i64, raw: &RawDetail) -> DetailRecord {
    normalize(Some(raw), &stub(platform, n))
}

fn seed(store: &MemoryListingStore, platform: &str, n: i64, detail: Option<DetailRecord>) {
    store.seed(StoredListing {
        id: n,
        stub: stub(platform, n),
        detail,
        detail_updated_at: Some(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()),
    });
}

fn registry(adapters: Vec<Arc<dyn PlatformAdapter>>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    registry
}

fn scheduler(store: &Arc<MemoryListingStore>, adapter: &Arc<ScriptedAdapter>) -> AuditScheduler {
    AuditScheduler::new(
        Arc::clone(store) as Arc<dyn ListingStore>,
        registry(vec![Arc::clone(adapter) as Arc<dyn PlatformAdapter>]),
        ClassificationConfig::default(),
    )
}

fn counts(total: usize, weak_before: usize, weak_after: usize) -> PlatformCounts {
    PlatformCounts {
        total,
        weak_before,
        weak_after,
    }
}

// ---------------------------------------------------------------------------
// sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn weak_record_refetched_as_weak_is_left_unchanged() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, Some(detail_for("dhgate", 1, &title_only())));
    let before = store.get(1).await.unwrap();

    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(title_only()));

    let report = scheduler(&store, &adapter).sweep(None).await.unwrap();

    assert_eq!(report.platforms.get("dhgate"), Some(&counts(1, 1, 1)));
    assert_eq!(report.still_weak, 1);
    assert_eq!(report.healed, 0);
    assert_eq!(store.get(1).await.unwrap(), before);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["platforms"]["dhgate"]["weakBefore"], 1);
    assert_eq!(json["platforms"]["dhgate"]["weakAfter"], 1);
}

#[tokio::test]
async fn weak_record_is_healed_and_good_records_are_not_fetched() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);
    seed(&store, "dhgate", 2, Some(detail_for("dhgate", 2, &rich(5))));

    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(6)));

    let report = scheduler(&store, &adapter).sweep(Some("dhgate")).await.unwrap();

    assert_eq!(report.platforms.get("dhgate"), Some(&counts(2, 1, 0)));
    assert_eq!(report.healed, 1);
    assert_eq!(adapter.called_urls(), vec![url(1)]);

    let healed = store.get(1).await.unwrap().unwrap();
    let detail = healed.detail.expect("healed listing should have a record");
    assert_eq!(detail.attribute_count(), 6);
    assert_eq!(detail.tier_count(), 2);
    assert!(healed.detail_updated_at.unwrap() > Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
}

#[tokio::test]
async fn heal_does_not_overwrite_a_record_written_during_the_fetch() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);

    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(1)));
    let writer = Arc::clone(&store);
    adapter.on_next_fetch(move || {
        seed(&writer, "dhgate", 1, Some(detail_for("dhgate", 1, &rich(6))));
    });

    let report = scheduler(&store, &adapter).sweep(None).await.unwrap();

    assert_eq!(report.platforms.get("dhgate"), Some(&counts(1, 1, 0)));
    assert_eq!(report.healed, 1);
    let detail = store.get(1).await.unwrap().unwrap().detail.unwrap();
    assert_eq!(detail.attribute_count(), 6);
}

#[tokio::test]
async fn heal_fetches_use_headless_without_forcing() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));

    scheduler(&store, &adapter).sweep(None).await.unwrap();

    let calls = adapter.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.headless, Some(true));
    assert!(!calls[0].1.force);
}

#[tokio::test]
async fn one_failing_listing_does_not_abort_the_sweep() {
    let store = Arc::new(MemoryListingStore::new());
    for n in 1..=3 {
        seed(&store, "dhgate", n, None);
    }
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(5)));
    adapter.push(&url(2), Err(FailureKind::Transient));
    adapter.push(&url(3), Ok(rich(2)));

    let report = scheduler(&store, &adapter).sweep(None).await.unwrap();

    assert_eq!(report.healed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.platforms.get("dhgate"), Some(&counts(3, 3, 1)));
    assert!(store.get(2).await.unwrap().unwrap().detail.is_none());
}

#[tokio::test]
async fn listing_without_registered_adapter_counts_as_failed() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);
    seed(&store, "alibaba", 2, None);
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(5)));

    let report = scheduler(&store, &adapter).sweep(None).await.unwrap();

    assert_eq!(report.platforms.get("alibaba"), Some(&counts(1, 1, 1)));
    assert_eq!(report.platforms.get("dhgate"), Some(&counts(1, 1, 0)));
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn fetch_concurrency_is_bounded() {
    let store = Arc::new(MemoryListingStore::new());
    for n in 1..=12 {
        seed(&store, "dhgate", n, None);
    }
    let adapter = Arc::new(ScriptedAdapter::new("dhgate").with_delay(Duration::from_millis(20)));

    let report = scheduler(&store, &adapter)
        .with_concurrency(3)
        .sweep(None)
        .await
        .unwrap();

    assert_eq!(report.failed, 12);
    assert_eq!(adapter.call_count(), 12);
    assert!(adapter.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn sweep_pages_in_batches_and_resumes_from_cursor() {
    let store = Arc::new(MemoryListingStore::new());
    for n in 1..=5 {
        seed(&store, "dhgate", n, None);
    }
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    let sweeper = scheduler(&store, &adapter).with_batch_size(2);

    let full = sweeper.sweep(None).await.unwrap();
    assert_eq!(full.platforms.get("dhgate").map(|c| c.total), Some(5));
    assert_eq!(full.last_cursor, Some(5));

    let resumed = sweeper.sweep_from(None, Some(3)).await.unwrap();
    assert_eq!(resumed.platforms.get("dhgate").map(|c| c.total), Some(2));
    assert_eq!(resumed.last_cursor, Some(5));

    let mut urls = adapter.called_urls();
    urls.sort();
    assert_eq!(urls.len(), 7);
    assert_eq!(urls.iter().filter(|u| **u == url(4)).count(), 2);
    assert_eq!(urls.iter().filter(|u| **u == url(2)).count(), 1);
}

#[tokio::test]
async fn cancelled_sweep_visits_nothing() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();

    let report = scheduler(&store, &adapter)
        .with_cancel(token)
        .sweep(None)
        .await
        .unwrap();
    assert!(report.platforms.is_empty());
    assert_eq!(adapter.call_count(), 0);
}

// ---------------------------------------------------------------------------
// refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_refresh_reports_kind_and_keeps_record() {
    let store = MemoryListingStore::new();
    seed(&store, "dhgate", 1, Some(detail_for("dhgate", 1, &rich(5))));
    let before = store.get(1).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Err(FailureKind::Permanent));
    let registry = registry(vec![adapter.clone() as Arc<dyn PlatformAdapter>]);

    let outcome = refresh_listing(&store, &registry, 1, &ClassificationConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome, RefreshOutcome::Failed { kind: FailureKind::Permanent });
    assert_eq!(outcome.to_string(), "upstream fetch failed: Permanent");
    assert!(!outcome.is_success());
    assert_eq!(store.get(1).await.unwrap(), before);
    assert!(adapter.calls.lock().unwrap()[0].1.force);
}

#[tokio::test]
async fn refresh_that_would_regress_keeps_stored_record() {
    let store = MemoryListingStore::new();
    seed(&store, "dhgate", 1, Some(detail_for("dhgate", 1, &rich(5))));
    let before = store.get(1).await.unwrap();
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(2)));
    let registry = registry(vec![adapter as Arc<dyn PlatformAdapter>]);

    let outcome = refresh_listing(&store, &registry, 1, &ClassificationConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome, RefreshOutcome::Kept { quality: QualityClass::Correct });
    assert_eq!(store.get(1).await.unwrap(), before);
}

#[tokio::test]
async fn refresh_compares_against_record_written_during_the_fetch() {
    let store = Arc::new(MemoryListingStore::new());
    seed(&store, "dhgate", 1, None);
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(2)));
    let writer = Arc::clone(&store);
    adapter.on_next_fetch(move || {
        seed(&writer, "dhgate", 1, Some(detail_for("dhgate", 1, &rich(5))));
    });
    let registry = registry(vec![adapter as Arc<dyn PlatformAdapter>]);

    let outcome = refresh_listing(store.as_ref(), &registry, 1, &ClassificationConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome, RefreshOutcome::Kept { quality: QualityClass::Correct });
    let detail = store.get(1).await.unwrap().unwrap().detail.unwrap();
    assert_eq!(detail.attribute_count(), 5);
}

#[tokio::test]
async fn refresh_by_url_updates_and_reports_quality() {
    let store = MemoryListingStore::new();
    seed(&store, "dhgate", 1, None);
    let adapter = Arc::new(ScriptedAdapter::new("dhgate"));
    adapter.push(&url(1), Ok(rich(5)));
    let registry = registry(vec![adapter as Arc<dyn PlatformAdapter>]);

    let outcome = refresh_by_url(
        &store,
        &registry,
        "https://dhgate.com/product/glass-jar/1.html?utm_source=email",
        &ClassificationConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, RefreshOutcome::Updated { quality: QualityClass::Correct });
    assert_eq!(outcome.to_string(), "updated (correct)");
    let detail = store.get(1).await.unwrap().unwrap().detail.unwrap();
    assert_eq!(detail.attribute_count(), 5);
}

#[tokio::test]
async fn refresh_of_unknown_listing_or_platform_is_an_error() {
    let store = MemoryListingStore::new();
    let registry = registry(Vec::new());
    let config = ClassificationConfig::default();

    assert!(matches!(
        refresh_listing(&store, &registry, 99, &config).await,
        Err(AuditError::ListingNotFound(id)) if id == "99"
    ));

    seed(&store, "made_in_china", 1, None);
    assert!(matches!(
        refresh_listing(&store, &registry, 1, &config).await,
        Err(AuditError::Scraper(ScraperError::UnknownPlatform(p))) if p == "made_in_china"
    ));
}
