//! Crawl subsystem: scheduling, throttling, retrying and checkpointing jobs
//!
//! Key components:
//! - `JobQueue`: leased job state with per-domain eligibility ordering
//! - `CheckpointStore`: durable snapshot of every job
//! - `DomainThrottle`: per-domain concurrency ceiling and request spacing
//! - `RetryPolicy`: pure retry/abandon decision per failure kind
//! - `Fetcher` / `HttpFetcher`: one request through the egress route
//! - `Extractor` / `ExtractorRegistry`: pluggable per-site parsing
//! - `Orchestrator`: worker pool tying the above together

pub mod checkpoint;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod throttle;

pub use checkpoint::{CheckpointError, CheckpointSnapshot, CheckpointStore};
pub use extractor::{DiscoveredLink, ExtractError, Extractor, ExtractorRegistry, Page, SelectorExtractor};
pub use fetcher::{FetchError, FetchedPage, Fetcher, HttpFetcher, StatusClass};
pub use orchestrator::{
    AbandonedJob, DomainReport, DrainReport, Orchestrator, OrchestratorConfig, OrchestratorError,
    RunReport, SeedJob,
};
pub use queue::{EnqueueOutcome, JobQueue, Lease, QueueCounts, QueueError};
pub use retry::{RetryDecision, RetryPolicy};
pub use throttle::{AdmissionPermit, DomainPolicy, DomainThrottle, ReleaseOutcome, ThrottleSettings};

use url::Url;

/// Tracking/session query parameters stripped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "sid",
    "sessionid",
    "ref",
    "aid",
    "label",
];

/// Normalize a URL for job deduplication
///
/// - Strips fragments
/// - Removes `www.` prefix from hostnames
/// - Removes trailing slashes from non-root paths
/// - Strips tracking/session query parameters
/// - Sorts remaining query parameters
///
/// Paths keep their case; many hotel sites use case-sensitive slugs.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();

    normalized.set_fragment(None);

    if let Some(host) = normalized.host_str().map(|h| h.to_string()) {
        if let Some(stripped) = host.strip_prefix("www.") {
            if let Err(e) = normalized.set_host(Some(stripped)) {
                tracing::warn!("Failed to strip www. from {}: {}", host, e);
            }
        }
    }

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(&path[..path.len() - 1]);
    }

    if let Some(query) = normalized.query() {
        let mut params: Vec<&str> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .filter(|p| {
                let key = p.split('=').next().unwrap_or("");
                !TRACKING_PARAMS.contains(&key.to_lowercase().as_str())
            })
            .collect();

        if params.is_empty() {
            normalized.set_query(None);
        } else {
            params.sort_unstable();
            let joined = params.join("&");
            normalized.set_query(Some(&joined));
        }
    }

    normalized.to_string()
}

/// Throttling key for a URL: lowercased host without `www.`
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| {
        let h = h.to_lowercase();
        h.strip_prefix("www.").map(str::to_string).unwrap_or(h)
    })
}
