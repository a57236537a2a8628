#![allow(dead_code)]

use image_guardian::{
    library::{ImageResolver, ResolveError},
    model::{CheckRecord, ImageId, ImageRef, ListOrder, RiskLevel, SearchOutcome, UserDecision},
    provider::{ProviderError, SearchProvider},
    scheduler::{BulkChecker, CheckerSettings},
    store::{MemoryStore, ResultStore, ScalarUpdate},
};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

pub fn ids(v: &[u64]) -> Vec<ImageId> {
    v.iter().copied().map(ImageId).collect()
}

pub fn url_for(id: u64) -> String {
    format!("https://img.test/{id}.jpg")
}

/// Registers `ids` with upload times one minute apart, in the given order.
pub fn seed(store: &dyn ResultStore, v: &[u64]) {
    let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let refs: Vec<ImageRef> = v
        .iter()
        .enumerate()
        .map(|(i, id)| ImageRef {
            id: ImageId(*id),
            uploaded_at: base + time::Duration::minutes(i as i64),
        })
        .collect();
    store.register_images(&refs).unwrap();
}

type SearchHook = Box<dyn Fn(&str) + Send + Sync>;

/// Scripted search provider. Each search consumes one unit of quota.
pub struct FakeProvider {
    pub quota: AtomicI64,
    pub quota_fails: AtomicBool,
    pub quota_calls: AtomicUsize,
    pub searches: Mutex<Vec<(String, Instant)>>,
    pub failing_urls: Mutex<HashSet<String>>,
    pub outcomes: Mutex<HashMap<String, SearchOutcome>>,
    pub delay: Duration,
    pub on_search: Mutex<Option<SearchHook>>,
}

impl FakeProvider {
    pub fn with_quota(quota: i64) -> Self {
        Self {
            quota: AtomicI64::new(quota),
            quota_fails: AtomicBool::new(false),
            quota_calls: AtomicUsize::new(0),
            searches: Mutex::new(Vec::new()),
            failing_urls: Mutex::new(HashSet::new()),
            outcomes: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            on_search: Mutex::new(None),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn set_outcome(&self, url: &str, outcome: SearchOutcome) {
        self.outcomes.lock().unwrap().insert(url.to_string(), outcome);
    }

    pub fn set_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_search.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn searched_urls(&self) -> Vec<String> {
        self.searches.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }
}

impl SearchProvider for FakeProvider {
    fn get_remaining_quota(&self) -> Result<i64, ProviderError> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        if self.quota_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("quota endpoint down".into()));
        }
        Ok(self.quota.load(Ordering::SeqCst))
    }

    fn check_image(&self, url: &str) -> Result<SearchOutcome, ProviderError> {
        self.searches
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        if let Some(hook) = self.on_search.lock().unwrap().as_ref() {
            hook(url);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.quota.fetch_sub(1, Ordering::SeqCst);
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(ProviderError::Http { status: 502 });
        }
        let outcome = self.outcomes.lock().unwrap().get(url).cloned();
        Ok(outcome.unwrap_or(SearchOutcome {
            search_id: Some(format!("search-{url}")),
            match_count: 0,
            match_percentage: Some(0.0),
            raw_result: serde_json::json!({"matches": []}),
        }))
    }
}

/// Resolver over a fixed id set. Ids outside it are not found.
#[derive(Default)]
pub struct FakeResolver {
    pub known: HashSet<ImageId>,
    pub unsupported: HashSet<ImageId>,
}

impl FakeResolver {
    pub fn with_ids(v: &[u64]) -> Self {
        Self {
            known: ids(v).into_iter().collect(),
            unsupported: HashSet::new(),
        }
    }

    pub fn unsupported(mut self, v: &[u64]) -> Self {
        self.unsupported.extend(ids(v));
        self
    }
}

impl ImageResolver for FakeResolver {
    fn resolve_checkable_url(&self, id: ImageId) -> Result<String, ResolveError> {
        if self.known.contains(&id) {
            Ok(url_for(id.0))
        } else {
            Err(ResolveError::NotFound(id))
        }
    }

    fn is_supported_format(&self, id: ImageId) -> bool {
        !self.unsupported.contains(&id)
    }
}

/// Memory store whose record writes fail for chosen images.
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: HashSet<ImageId>,
}

impl FailingStore {
    pub fn failing(v: &[u64]) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: ids(v).into_iter().collect(),
        }
    }
}

impl ResultStore for FailingStore {
    fn get_record(&self, id: ImageId) -> Result<Option<CheckRecord>> {
        self.inner.get_record(id)
    }

    fn upsert_record(&self, record: CheckRecord) -> Result<bool> {
        if self.fail_writes.contains(&record.image_id) {
            bail!("disk full");
        }
        self.inner.upsert_record(record)
    }

    fn list_unchecked_image_ids(&self, order: ListOrder) -> Result<Vec<ImageId>> {
        self.inner.list_unchecked_image_ids(order)
    }

    fn get_scalar(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.get_scalar(key)
    }

    fn set_scalar(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.inner.set_scalar(key, value)
    }

    fn delete_scalar(&self, key: &str) -> Result<()> {
        self.inner.delete_scalar(key)
    }

    fn update_scalar(&self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()> {
        self.inner.update_scalar(key, f)
    }

    fn register_images(&self, images: &[ImageRef]) -> Result<usize> {
        self.inner.register_images(images)
    }

    fn set_user_decision(&self, id: ImageId, decision: UserDecision) -> Result<bool> {
        self.inner.set_user_decision(id, decision)
    }

    fn set_manual_risk(&self, id: ImageId, level: Option<RiskLevel>, image_url: &str) -> Result<()> {
        self.inner.set_manual_risk(id, level, image_url)
    }

    fn list_images(&self) -> Result<Vec<ImageRef>> {
        self.inner.list_images()
    }

    fn list_records(&self) -> Result<Vec<CheckRecord>> {
        self.inner.list_records()
    }

    fn delete_records_checked_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        self.inner.delete_records_checked_before(cutoff)
    }
}

pub fn fast_settings() -> CheckerSettings {
    CheckerSettings {
        rate_limit: Duration::ZERO,
        ..CheckerSettings::default()
    }
}

pub struct Harness {
    pub store: Arc<dyn ResultStore>,
    pub provider: Arc<FakeProvider>,
    pub checker: Arc<BulkChecker>,
}

pub fn harness(
    settings: CheckerSettings,
    store: Arc<dyn ResultStore>,
    provider: FakeProvider,
    resolver: FakeResolver,
) -> Harness {
    let provider = Arc::new(provider);
    let checker = Arc::new(BulkChecker::new(
        settings,
        Arc::clone(&store),
        Arc::clone(&provider) as Arc<dyn SearchProvider>,
        Arc::new(resolver),
    ));
    Harness {
        store,
        provider,
        checker,
    }
}

/// Calls `process_next` until the run stops, with a safety cap.
pub fn drain(checker: &BulkChecker) -> Vec<image_guardian::scheduler::Tick> {
    let mut ticks = Vec::new();
    for _ in 0..1000 {
        let t = checker.process_next().unwrap();
        ticks.push(t);
        if t != image_guardian::scheduler::Tick::Continue {
            break;
        }
    }
    ticks
}
