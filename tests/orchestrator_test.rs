//! End-to-end tests for the crawl orchestrator
//!
//! Drive the full worker pipeline with an in-process fetcher and extractor
//! and the in-memory sink.

use async_trait::async_trait;
use hotelcrawl::{
    crawl::{
        checkpoint::CheckpointStore, DomainPolicy, ExtractError, Extractor, ExtractorRegistry,
        FetchError, FetchedPage, Fetcher, JobQueue, Orchestrator, OrchestratorConfig,
        OrchestratorError, Page, RetryPolicy, SeedJob, ThrottleSettings,
    },
    crawl::extractor::DiscoveredLink,
    normalize::Normalizer,
    sink::{MemorySink, Sink, SinkAck, SinkError},
    types::{CanonicalRecord, FailureKind, JobKind, JobState, RawRecord},
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Status(u16),
    ConnectionReset,
    Hang,
}

/// Answers 200 unless a scripted response is queued for the URL
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
    latency: Duration,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self::default()
    }

    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn script(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts.lock().insert(url.to_string(), responses.into());
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    fn peak(&self, domain: &str) -> usize {
        self.peak.lock().get(domain).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, domain: &str) -> Result<FetchedPage, FetchError> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        {
            let mut in_flight = self.in_flight.lock();
            let current = in_flight.entry(domain.to_string()).or_default();
            *current += 1;
            let mut peak = self.peak.lock();
            let best = peak.entry(domain.to_string()).or_default();
            *best = (*best).max(*current);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self
            .scripts
            .lock()
            .get_mut(url.as_str())
            .and_then(|queue| queue.pop_front());

        if matches!(next, Some(Scripted::Hang)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if let Some(current) = self.in_flight.lock().get_mut(domain) {
            *current -= 1;
        }

        match next {
            Some(Scripted::Status(status)) => Ok(FetchedPage::new(url.clone(), status, "")),
            Some(Scripted::ConnectionReset) => Err(FetchError::Connection("connection reset".to_string())),
            Some(Scripted::Hang) | None => Ok(FetchedPage::new(url.clone(), 200, "<html></html>")),
        }
    }
}

/// Listing pages link to configured URLs; detail pages yield a record
#[derive(Default)]
struct FakeExtractor {
    listings: HashMap<String, Vec<(String, JobKind)>>,
    /// Detail pages whose layout "changed"
    broken: HashSet<String>,
    /// Detail pages that extract without a hotel name
    nameless: HashSet<String>,
    /// Per-page field overrides
    fields: HashMap<String, Vec<(String, String)>>,
}

impl FakeExtractor {
    fn new() -> Self {
        Self::default()
    }

    fn with_listing(mut self, url: &str, details: &[&str]) -> Self {
        self.listings.insert(
            url.to_string(),
            details.iter().map(|d| (d.to_string(), JobKind::Detail)).collect(),
        );
        self
    }

    fn with_broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    fn with_nameless(mut self, url: &str) -> Self {
        self.nameless.insert(url.to_string());
        self
    }

    fn with_fields(mut self, url: &str, fields: &[(&str, &str)]) -> Self {
        self.fields.insert(
            url.to_string(),
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );
        self
    }
}

impl Extractor for FakeExtractor {
    fn extract(&self, page: &Page) -> Result<RawRecord, ExtractError> {
        if self.broken.contains(page.url.as_str()) {
            return Err(ExtractError::MissingFields(vec!["name".to_string()]));
        }

        let mut record = RawRecord::new(page.domain.clone(), page.url.as_str(), page.fetched_at)
            .with_field("review_score", "8.2")
            .with_field("review_scale", "10")
            .with_field("price", "EUR 99");
        if !self.nameless.contains(page.url.as_str()) {
            record = record.with_field("name", format!("Hotel {}", page.url.path()));
        }
        for (key, value) in self.fields.get(page.url.as_str()).into_iter().flatten() {
            record = record.with_field(key.as_str(), value.as_str());
        }
        Ok(record)
    }

    fn discover_links(&self, page: &Page) -> Result<Vec<DiscoveredLink>, ExtractError> {
        Ok(self
            .listings
            .get(page.url.as_str())
            .map(|links| {
                links
                    .iter()
                    .filter_map(|(url, kind)| {
                        Url::parse(url).ok().map(|url| DiscoveredLink { url, kind: *kind })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Sink whose storage is down
#[derive(Default)]
struct FailingSink {
    calls: AtomicUsize,
}

#[async_trait]
impl Sink for FailingSink {
    async fn upsert(&self, _record: &CanonicalRecord) -> Result<SinkAck, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("storage offline".to_string()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 4,
        fetch_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_secs(10),
        idle_poll: Duration::from_millis(10),
        throttle: ThrottleSettings {
            default_policy: DomainPolicy {
                max_concurrent: 2,
                min_interval: Duration::ZERO,
            },
            overrides: HashMap::new(),
            failure_threshold: 3,
            cooldown_cap: Duration::from_millis(100),
        },
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: Duration::ZERO,
        },
    }
}

fn registry(domains: &[&str], extractor: FakeExtractor) -> ExtractorRegistry {
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);
    let mut registry = ExtractorRegistry::new();
    for domain in domains {
        registry.register(*domain, Arc::clone(&extractor));
    }
    registry
}

fn orchestrator(
    config: OrchestratorConfig,
    queue: JobQueue,
    fetcher: Arc<ScriptedFetcher>,
    extractors: ExtractorRegistry,
    sink: Arc<dyn Sink>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        config,
        Arc::new(queue),
        fetcher,
        extractors,
        Normalizer::default(),
        sink,
    ))
}

fn detail_seed(url: &str) -> SeedJob {
    SeedJob::new("example.test", url, JobKind::Detail)
}

const DRAIN: Duration = Duration::from_secs(10);

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_listing_discovers_three_details() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let extractor = FakeExtractor::new().with_listing(
        "https://example.test/search?city=lisbon",
        &[
            "https://example.test/hotel/1",
            "https://example.test/hotel/2",
            "https://example.test/hotel/3",
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher,
        registry(&["example.test"], extractor),
        sink.clone(),
    );

    orch.submit(vec![SeedJob::new(
        "example.test",
        "https://example.test/search?city=lisbon",
        JobKind::Listing,
    )])
    .unwrap();
    orch.run(4).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);

    let jobs = orch.queue().jobs();
    let listing = jobs.iter().find(|j| j.kind == JobKind::Listing).unwrap();
    let details: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::Detail).collect();
    assert_eq!(details.len(), 3);
    assert!(details.iter().all(|j| j.state == JobState::Succeeded));
    assert!(details.iter().all(|j| j.parent == Some(listing.id)));
    assert_eq!(listing.state, JobState::Succeeded);

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.source_site == "example.test"));
    assert!(records.iter().all(|r| r.review_score == Some(4.1)));
    assert_eq!(drained.report.records_emitted, 3);
    assert_eq!(drained.report.domains["example.test"].discovered, 3);
    assert_eq!(drained.report.domains["example.test"].succeeded, 4);
}

#[tokio::test]
async fn test_transient_failures_then_success_emits_once() {
    let url = "https://example.test/hotel/1";
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script(url, vec![Scripted::Status(503), Scripted::ConnectionReset]);
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher.clone(),
        registry(&["example.test"], FakeExtractor::new()),
        sink.clone(),
    );

    orch.submit(vec![detail_seed(url)]).unwrap();
    orch.run(2).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);
    let job = orch.queue().jobs().pop().unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 3);
    assert_eq!(fetcher.calls(url), 3);

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.upsert_calls(), 1);
    assert_eq!(drained.report.retried, 2);
    assert_eq!(drained.report.failures[&FailureKind::TransientNetwork], 2);
}

#[tokio::test]
async fn test_attempt_cap_abandons_transient_job() {
    let url = "https://example.test/hotel/1";
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script(url, vec![Scripted::Status(500); 5]);
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher.clone(),
        registry(&["example.test"], FakeExtractor::new()),
        sink.clone(),
    );

    orch.submit(vec![detail_seed(url)]).unwrap();
    orch.run(1).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert_eq!(fetcher.calls(url), 3);
    assert!(sink.is_empty());
    assert_eq!(drained.report.abandoned.len(), 1);
    let abandoned = &drained.report.abandoned[0];
    assert_eq!(abandoned.failure, FailureKind::TransientNetwork);
    assert!(!abandoned.needs_review);
}

#[tokio::test]
async fn test_permanent_parse_and_normalization_failures() {
    let missing = "https://example.test/hotel/gone";
    let broken = "https://example.test/hotel/broken";
    let nameless = "https://example.test/hotel/nameless";

    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script(missing, vec![Scripted::Status(404)]);
    let extractor = FakeExtractor::new().with_broken(broken).with_nameless(nameless);
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher.clone(),
        registry(&["example.test"], extractor),
        sink.clone(),
    );

    orch.submit(vec![detail_seed(missing), detail_seed(broken), detail_seed(nameless)])
        .unwrap();
    orch.run(3).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);
    assert!(sink.is_empty());

    let by_url: HashMap<String, _> = orch
        .queue()
        .jobs()
        .into_iter()
        .map(|j| (j.url.clone(), j))
        .collect();

    // 404: no retry
    let gone = &by_url[missing];
    assert_eq!(gone.state, JobState::Abandoned);
    assert_eq!(gone.attempts, 1);
    assert!(!gone.needs_review);
    assert_eq!(fetcher.calls(missing), 1);

    // Layout change: one immediate retry, then flagged
    let layout = &by_url[broken];
    assert_eq!(layout.state, JobState::Abandoned);
    assert_eq!(layout.attempts, 2);
    assert!(layout.needs_review);
    assert_eq!(layout.last_error, Some(FailureKind::ParseFailure));

    let unnamed = &by_url[nameless];
    assert_eq!(unnamed.state, JobState::Abandoned);
    assert_eq!(unnamed.last_error, Some(FailureKind::NormalizationError));

    let report = &drained.report;
    assert_eq!(report.abandoned_by_kind[&FailureKind::Permanent], 1);
    assert_eq!(report.abandoned_by_kind[&FailureKind::ParseFailure], 1);
    assert_eq!(report.normalization_errors, 2);
    assert_eq!(report.needs_review().count(), 2);
}

#[tokio::test]
async fn test_domain_without_extractor_is_permanent() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher,
        ExtractorRegistry::new(),
        Arc::new(MemorySink::new()),
    );

    orch.submit(vec![detail_seed("https://example.test/hotel/1")]).unwrap();
    orch.run(1).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert_eq!(drained.report.abandoned_by_kind[&FailureKind::Permanent], 1);
    assert!(drained.pending.is_empty());
}

#[tokio::test]
async fn test_duplicate_detail_links_enqueued_once() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let extractor = FakeExtractor::new()
        .with_listing("https://example.test/search?page=1", &["https://example.test/hotel/7"])
        .with_listing(
            "https://example.test/search?page=2",
            &["https://www.example.test/hotel/7?utm_source=list#photos"],
        );
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher,
        registry(&["example.test"], extractor),
        sink.clone(),
    );

    orch.submit(vec![
        SeedJob::new("example.test", "https://example.test/search?page=1", JobKind::Listing),
        SeedJob::new("example.test", "https://example.test/search?page=2", JobKind::Listing),
    ])
    .unwrap();
    orch.run(2).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);
    let details = orch
        .queue()
        .jobs()
        .into_iter()
        .filter(|j| j.kind == JobKind::Detail)
        .count();
    assert_eq!(details, 1);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");
    let done = "https://example.test/hotel/1";
    let crashed = "https://example.test/hotel/2";
    let untouched = "https://example.test/hotel/3";

    // First process: one job finished, one leased by a worker that died
    {
        let queue = JobQueue::open(CheckpointStore::new(&path))
            .unwrap()
            .with_lease_duration(Duration::from_millis(50));
        let base = chrono::Utc::now() - chrono::Duration::seconds(1);
        for (i, url) in [done, crashed, untouched].into_iter().enumerate() {
            let mut job = hotelcrawl::Job::new("example.test", url, JobKind::Detail);
            job.created_at = base + chrono::Duration::milliseconds(i as i64);
            job.next_eligible_at = job.created_at;
            queue.enqueue(job).unwrap();
        }

        let first = queue.lease_next("worker-0").unwrap().unwrap();
        assert_eq!(first.job.url, done);
        queue.complete(&first).unwrap();

        let second = queue.lease_next("worker-1").unwrap().unwrap();
        assert_eq!(second.job.url, crashed);
        queue.flush().unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let fetcher = Arc::new(ScriptedFetcher::new());
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::open(CheckpointStore::new(&path)).unwrap(),
        fetcher.clone(),
        registry(&["example.test"], FakeExtractor::new()),
        sink.clone(),
    );
    orch.run(2).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);
    assert_eq!(fetcher.calls(done), 0);
    assert_eq!(fetcher.calls(crashed), 1);
    assert_eq!(fetcher.calls(untouched), 1);
    assert_eq!(sink.len(), 2);

    // The final snapshot on disk has every job succeeded
    let snapshot = CheckpointStore::new(&path).load().unwrap();
    assert_eq!(snapshot.count_in_state(JobState::Succeeded), 3);
}

#[tokio::test]
async fn test_sink_failure_is_fatal_and_aborts_drain() {
    let url = "https://example.test/hotel/1";
    let sink = Arc::new(FailingSink::default());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        Arc::new(ScriptedFetcher::new()),
        registry(&["example.test"], FakeExtractor::new()),
        sink.clone(),
    );

    orch.submit(vec![detail_seed(url)]).unwrap();
    orch.run(2).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(!drained.timed_out);
    let fatal = drained.fatal.clone().unwrap();
    assert!(fatal.contains("sink failure"), "{}", fatal);
    assert!(!drained.is_complete());

    // Every sink attempt was made, and the job is not marked done
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    assert_eq!(drained.pending.len() + drained.in_flight.len(), 1);
    assert_eq!(drained.report.domains["example.test"].fatal, 1);
    assert_eq!(drained.report.records_emitted, 0);
}

#[tokio::test]
async fn test_drain_timeout_reports_in_flight_jobs() {
    let url = "https://example.test/hotel/slow";
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script(url, vec![Scripted::Hang]);
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        fetcher,
        registry(&["example.test"], FakeExtractor::new()),
        Arc::new(MemorySink::new()),
    );

    let outcomes = orch.submit(vec![detail_seed(url)]).unwrap();
    let id = match outcomes[0] {
        hotelcrawl::crawl::EnqueueOutcome::Enqueued(id) => id,
        ref other => panic!("unexpected outcome {:?}", other),
    };
    orch.run(1).unwrap();

    let drained = orch.drain(Duration::from_millis(200)).await;
    assert!(drained.timed_out);
    assert!(drained.fatal.is_none());
    assert_eq!(drained.in_flight, vec![id]);
    assert!(!orch.is_running());
}

#[tokio::test]
async fn test_submit_rejected_after_drain() {
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        Arc::new(ScriptedFetcher::new()),
        ExtractorRegistry::new(),
        Arc::new(MemorySink::new()),
    );
    orch.run(1).unwrap();
    assert!(matches!(orch.run(1), Err(OrchestratorError::AlreadyRunning)));

    let drained = orch.drain(DRAIN).await;
    assert!(drained.is_complete());
    assert!(matches!(
        orch.submit(vec![detail_seed("https://example.test/hotel/1")]),
        Err(OrchestratorError::Draining)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_domain_ceiling_respected() {
    let fetcher = Arc::new(ScriptedFetcher::with_latency(Duration::from_millis(20)));
    let mut config = test_config();
    config.throttle.overrides.insert(
        "b.test".to_string(),
        DomainPolicy {
            max_concurrent: 1,
            min_interval: Duration::ZERO,
        },
    );
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        config,
        JobQueue::in_memory(),
        fetcher.clone(),
        registry(&["a.test", "b.test"], FakeExtractor::new()),
        sink.clone(),
    );

    let seeds = (0..8).flat_map(|i| {
        [
            SeedJob::for_url(format!("https://a.test/hotel/{}", i), JobKind::Detail),
            SeedJob::for_url(format!("https://b.test/hotel/{}", i), JobKind::Detail),
        ]
    });
    orch.submit(seeds).unwrap();
    orch.run(8).unwrap();
    let drained = orch.drain(DRAIN).await;

    assert!(drained.is_complete(), "{:?}", drained);
    assert_eq!(sink.len(), 16);
    assert!(fetcher.peak("a.test") <= 2, "a.test peak {}", fetcher.peak("a.test"));
    assert!(fetcher.peak("a.test") >= 1);
    assert_eq!(fetcher.peak("b.test"), 1);
    assert_eq!(drained.report.domains["a.test"].succeeded, 8);
    assert_eq!(drained.report.domains["b.test"].succeeded, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lease_outlives_slow_admission() {
    let urls = [
        "https://example.test/hotel/1",
        "https://example.test/hotel/2",
        "https://example.test/hotel/3",
    ];
    let fetcher = Arc::new(ScriptedFetcher::new());
    let mut config = test_config();
    config.workers = 3;
    // Each admission waits longer than the lease lasts
    config.throttle.default_policy = DomainPolicy {
        max_concurrent: 1,
        min_interval: Duration::from_millis(300),
    };
    let queue = JobQueue::in_memory().with_lease_duration(Duration::from_millis(200));
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        config,
        queue,
        fetcher.clone(),
        registry(&["example.test"], FakeExtractor::new()),
        sink.clone(),
    );

    orch.submit(urls.iter().map(|url| detail_seed(url))).unwrap();
    orch.run(0).unwrap();
    let drained = orch.drain_default().await;

    assert!(drained.is_complete(), "{:?}", drained);
    for url in urls {
        assert_eq!(fetcher.calls(url), 1, "{} fetched more than once", url);
    }
    assert_eq!(sink.len(), 3);
    assert_eq!(sink.upsert_calls(), 3);
    assert_eq!(drained.report.records_emitted, 3);
    let jobs = orch.queue().jobs();
    assert!(jobs.iter().all(|j| j.state == JobState::Succeeded && j.attempts == 1), "{:?}", jobs);
}

#[tokio::test]
async fn test_literals_with_several_numbers() {
    let first = "https://example.test/hotel/1";
    let second = "https://example.test/hotel/2";
    let extractor = FakeExtractor::new()
        .with_fields(first, &[("price", "$120 1 night"), ("star_rating", "3★")])
        .with_fields(second, &[("price", "€85 2 adults"), ("star_rating", "4 ⭐")]);
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(),
        JobQueue::in_memory(),
        Arc::new(ScriptedFetcher::new()),
        registry(&["example.test"], extractor),
        sink.clone(),
    );

    orch.submit(vec![detail_seed(first), detail_seed(second)]).unwrap();
    orch.run(2).unwrap();
    let drained = orch.drain(DRAIN).await;
    assert!(drained.is_complete(), "{:?}", drained);

    let records = sink.records();
    let by_url = |url: &str| records.iter().find(|r| r.source_url == url).unwrap();

    let one = by_url(first);
    assert_eq!(one.star_rating, Some(3.0));
    assert_eq!(one.room_rates[0].price.amount, Some(120.0));
    assert_eq!(one.room_rates[0].price.currency.as_deref(), Some("USD"));

    let two = by_url(second);
    assert_eq!(two.star_rating, Some(4.0));
    assert_eq!(two.room_rates[0].price.amount, Some(85.0));
    assert_eq!(two.room_rates[0].price.currency.as_deref(), Some("EUR"));
}
