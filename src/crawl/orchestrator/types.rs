//! Orchestrator types: configuration, seeds, errors and run reports

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::crawl::queue::QueueError;
use crate::crawl::retry::RetryPolicy;
use crate::crawl::throttle::ThrottleSettings;
use crate::crawl::domain_of;
use crate::types::{FailureKind, Job, JobId, JobKind};

/// Runtime settings for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default worker count for `run`
    pub workers: usize,
    /// Wall-clock bound on one fetch; expiry is a transient network failure
    pub fetch_timeout: Duration,
    /// Default timeout for `drain`
    pub drain_timeout: Duration,
    /// Longest an idle worker sleeps before looking for work again
    pub idle_poll: Duration,
    pub throttle: ThrottleSettings,
    pub retry: RetryPolicy,
}

impl OrchestratorConfig {
    /// Build from the TOML configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.crawl.workers.max(1),
            fetch_timeout: config.fetch.timeout(),
            drain_timeout: config.crawl.drain_timeout(),
            idle_poll: config.crawl.idle_poll(),
            throttle: ThrottleSettings::from_config(&config.throttle),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A top-level job submitted by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedJob {
    /// Throttling domain; derived from the URL host when empty
    pub domain: String,
    pub url: String,
    pub kind: JobKind,
}

impl SeedJob {
    pub fn new(domain: impl Into<String>, url: impl Into<String>, kind: JobKind) -> Self {
        Self {
            domain: domain.into(),
            url: url.into(),
            kind,
        }
    }

    /// Seed whose domain is the URL host
    pub fn for_url(url: impl Into<String>, kind: JobKind) -> Self {
        Self::new("", url, kind)
    }

    pub(crate) fn into_job(self) -> Result<Job, OrchestratorError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| OrchestratorError::InvalidSeed(format!("{}: {}", self.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(OrchestratorError::InvalidSeed(format!(
                "{}: unsupported scheme",
                self.url
            )));
        }

        let domain = match self.domain.trim() {
            "" => domain_of(&parsed)
                .ok_or_else(|| OrchestratorError::InvalidSeed(format!("{}: no host", self.url)))?,
            domain => domain.to_lowercase(),
        };

        Ok(Job::new(domain, parsed.to_string(), self.kind))
    }
}

/// Errors from orchestrator control operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Orchestrator is draining; no new submissions accepted")]
    Draining,

    #[error("Workers are already running")]
    AlreadyRunning,

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Per-domain outcome counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainReport {
    pub succeeded: usize,
    pub abandoned: usize,
    /// Failed attempts that were scheduled for another try
    pub retried: usize,
    pub records_emitted: usize,
    /// Child jobs enqueued from listing pages
    pub discovered: usize,
    /// Jobs interrupted by a fatal sink failure
    pub fatal: usize,
}

/// A job that reached `abandoned`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedJob {
    pub id: JobId,
    pub domain: String,
    pub url: String,
    pub kind: JobKind,
    pub failure: FailureKind,
    /// Likely site-layout change
    pub needs_review: bool,
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub domains: BTreeMap<String, DomainReport>,
    /// Every failed attempt, retried or not, by kind
    pub failures: BTreeMap<FailureKind, usize>,
    /// Abandoned jobs by the failure that ended them
    pub abandoned_by_kind: BTreeMap<FailureKind, usize>,
    pub retried: usize,
    pub records_emitted: usize,
    pub normalization_errors: usize,
    pub abandoned: Vec<AbandonedJob>,
}

impl RunReport {
    fn domain(&mut self, domain: &str) -> &mut DomainReport {
        self.domains.entry(domain.to_string()).or_default()
    }

    pub(crate) fn record_success(&mut self, job: &Job, records: usize) {
        let entry = self.domain(&job.domain);
        entry.succeeded += 1;
        entry.records_emitted += records;
        self.records_emitted += records;
    }

    pub(crate) fn record_discovered(&mut self, domain: &str, count: usize) {
        self.domain(domain).discovered += count;
    }

    pub(crate) fn record_retry(&mut self, job: &Job, kind: FailureKind) {
        self.domain(&job.domain).retried += 1;
        *self.failures.entry(kind).or_default() += 1;
        self.retried += 1;
    }

    pub(crate) fn record_abandon(&mut self, job: &Job, kind: FailureKind, needs_review: bool) {
        self.domain(&job.domain).abandoned += 1;
        *self.failures.entry(kind).or_default() += 1;
        *self.abandoned_by_kind.entry(kind).or_default() += 1;
        self.abandoned.push(AbandonedJob {
            id: job.id,
            domain: job.domain.clone(),
            url: job.url.clone(),
            kind: job.kind,
            failure: kind,
            needs_review,
        });
    }

    pub(crate) fn record_normalization_error(&mut self) {
        self.normalization_errors += 1;
    }

    pub(crate) fn record_fatal(&mut self, job: &Job) {
        self.domain(&job.domain).fatal += 1;
        *self.failures.entry(FailureKind::SinkError).or_default() += 1;
    }

    pub fn succeeded(&self) -> usize {
        self.domains.values().map(|d| d.succeeded).sum()
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }

    /// Abandoned jobs flagged for a likely layout change
    pub fn needs_review(&self) -> impl Iterator<Item = &AbandonedJob> {
        self.abandoned.iter().filter(|a| a.needs_review)
    }
}

/// Result of `drain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub report: RunReport,
    /// Jobs still leased when drain returned; a later run picks them up after
    /// their leases expire
    pub in_flight: Vec<JobId>,
    /// Jobs not yet attempted or waiting for a retry
    pub pending: Vec<JobId>,
    pub timed_out: bool,
    /// Diagnostic for a condition that stopped the run early
    pub fatal: Option<String>,
}

impl DrainReport {
    /// Every job reached a terminal state and nothing was fatal
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.fatal.is_none() && self.in_flight.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_domain_from_url_host() {
        let job = SeedJob::for_url("https://www.Example.test/search?q=lisbon", JobKind::Listing)
            .into_job()
            .unwrap();
        assert_eq!(job.domain, "example.test");
        assert_eq!(job.kind, JobKind::Listing);
        assert!(job.parent.is_none());

        let job = SeedJob::new("Hotels.Example", "https://cdn.hotels.example/h/1", JobKind::Detail)
            .into_job()
            .unwrap();
        assert_eq!(job.domain, "hotels.example");
    }

    #[test]
    fn test_invalid_seeds_rejected() {
        assert!(matches!(
            SeedJob::for_url("not a url", JobKind::Listing).into_job(),
            Err(OrchestratorError::InvalidSeed(_))
        ));
        assert!(matches!(
            SeedJob::for_url("ftp://example.test/list", JobKind::Listing).into_job(),
            Err(OrchestratorError::InvalidSeed(_))
        ));
    }

    #[test]
    fn test_report_counts() {
        let job = Job::new("example.test", "https://example.test/h/1", JobKind::Detail);
        let mut report = RunReport::default();
        report.record_retry(&job, FailureKind::TransientNetwork);
        report.record_success(&job, 1);
        report.record_abandon(&job, FailureKind::ParseFailure, true);

        let domain = &report.domains["example.test"];
        assert_eq!((domain.succeeded, domain.retried, domain.abandoned), (1, 1, 1));
        assert_eq!(report.records_emitted, 1);
        assert_eq!(report.failures[&FailureKind::TransientNetwork], 1);
        assert_eq!(report.abandoned_by_kind[&FailureKind::ParseFailure], 1);
        assert_eq!(report.needs_review().count(), 1);
        assert_eq!(report.succeeded(), 1);
    }
}
