//! Worker loop and per-job pipeline

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

use super::Orchestrator;
use crate::crawl::domain_of;
use crate::crawl::extractor::{DiscoveredLink, Page};
use crate::crawl::fetcher::{FetchError, FetchedPage};
use crate::crawl::queue::{EnqueueOutcome, Lease, QueueError};
use crate::crawl::retry::RetryDecision;
use crate::crawl::throttle::ReleaseOutcome;
use crate::sink::{SinkAck, SinkError};
use crate::types::{CanonicalRecord, FailureKind, Job, JobKind};

/// Shortest idle sleep, so a worker never spins on an empty queue
const MIN_IDLE_WAIT: Duration = Duration::from_millis(1);

/// How a failed job should be settled
struct Failure {
    kind: FailureKind,
    /// Server-requested minimum delay before the next attempt
    retry_hint: Option<Duration>,
    detail: String,
}

impl Failure {
    fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            retry_hint: None,
            detail: detail.into(),
        }
    }
}

/// Why a job stopped before succeeding
enum Halt {
    Failed(Failure),
    /// The lease lapsed; another worker may own the job now
    LeaseLost,
}

impl From<Failure> for Halt {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

impl Orchestrator {
    pub(super) async fn worker_loop(self: Arc<Self>, name: String) {
        debug!(worker = %name, "Worker started");

        while !self.is_stopping() {
            let lease = match self.queue.lease_next(&name) {
                Ok(lease) => lease,
                Err(e) => {
                    error!(worker = %name, "Failed to lease a job: {}", e);
                    self.idle_wait(self.config.idle_poll).await;
                    continue;
                }
            };

            match lease {
                Some(lease) => {
                    self.process(lease).await;
                    self.progress.notify_waiters();
                }
                None => {
                    let wait = self
                        .queue
                        .next_eligible_at()
                        .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                        .map_or(self.config.idle_poll, |until| until.min(self.config.idle_poll))
                        .max(MIN_IDLE_WAIT);
                    self.idle_wait(wait).await;
                }
            }
        }

        debug!(worker = %name, "Worker stopped");
    }

    async fn idle_wait(&self, wait: Duration) {
        let woken = self.work_available.notified();
        if self.is_stopping() {
            return;
        }
        tokio::select! {
            _ = woken => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    /// Run one leased job, renewing its lease until the job settles.
    ///
    /// A failed renewal does not cancel the pipeline mid-write; the ownership
    /// checks inside `run_job` stop it at the next safe point.
    async fn process(&self, lease: Lease) {
        let pipeline = self.run_job(&lease);
        tokio::pin!(pipeline);

        let period = (self.queue.lease_duration() / 3).max(MIN_IDLE_WAIT);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut held = true;

        loop {
            tokio::select! {
                _ = &mut pipeline => return,
                _ = heartbeat.tick(), if held => {
                    if let Err(e) = self.queue.renew(&lease) {
                        held = false;
                        self.log_settle_error(&lease.job, "renew", e);
                    }
                }
            }
        }
    }

    /// Renew the lease at a checkpoint; false once the job may belong to someone else
    fn still_held(&self, lease: &Lease, stage: &str) -> bool {
        match self.queue.renew(lease) {
            Ok(_) => true,
            Err(e) => {
                self.log_settle_error(&lease.job, stage, e);
                false
            }
        }
    }

    /// Run one leased job to a settled state
    async fn run_job(&self, lease: &Lease) {
        let job = lease.job.clone();
        let started = Instant::now();
        debug!(
            job_id = %job.id,
            domain = %job.domain,
            kind = %job.kind,
            attempt = lease.attempt(),
            "Job leased"
        );

        let url = match Url::parse(&job.url) {
            Ok(url) => url,
            Err(e) => {
                self.settle_failure(lease, Failure::new(FailureKind::Permanent, format!("invalid URL: {}", e)));
                return;
            }
        };

        let page = match self.fetch(lease, &url).await {
            Ok(page) => page,
            Err(Halt::Failed(failure)) => {
                self.settle_failure(lease, failure);
                return;
            }
            Err(Halt::LeaseLost) => return,
        };

        let extractor = match self.extractors.get(&job.domain) {
            Ok(extractor) => extractor,
            Err(e) => {
                self.settle_failure(lease, Failure::new(e.failure_kind(), e.to_string()));
                return;
            }
        };

        let page = Page {
            url: page.final_url,
            domain: job.domain.clone(),
            kind: job.kind,
            body: page.body,
            fetched_at: Utc::now(),
        };

        match job.kind {
            JobKind::Listing => {
                let links = tokio::task::spawn_blocking(move || extractor.discover_links(&page)).await;
                match links {
                    Ok(Ok(links)) => {
                        let discovered = self.enqueue_children(&job, links);
                        debug!(job_id = %job.id, discovered, "Links discovered");
                        self.settle_success(lease, 0, started);
                    }
                    Ok(Err(e)) => self.settle_failure(lease, Failure::new(e.failure_kind(), e.to_string())),
                    Err(e) => self.settle_failure(
                        lease,
                        Failure::new(FailureKind::ParseFailure, format!("extractor task failed: {}", e)),
                    ),
                }
            }
            JobKind::Detail => {
                let raw = tokio::task::spawn_blocking(move || extractor.extract(&page)).await;
                let raw = match raw {
                    Ok(Ok(raw)) => raw,
                    Ok(Err(e)) => {
                        self.settle_failure(lease, Failure::new(e.failure_kind(), e.to_string()));
                        return;
                    }
                    Err(e) => {
                        self.settle_failure(
                            lease,
                            Failure::new(FailureKind::ParseFailure, format!("extractor task failed: {}", e)),
                        );
                        return;
                    }
                };
                debug!(job_id = %job.id, fields = raw.fields.len(), "Record extracted");

                let record = match self.normalizer.normalize(&raw) {
                    Ok(record) => record,
                    Err(e) => {
                        self.report.lock().record_normalization_error();
                        self.settle_failure(lease, Failure::new(e.failure_kind(), e.to_string()));
                        return;
                    }
                };

                // A second owner would emit a second version of the record
                if !self.still_held(lease, "deliver") {
                    return;
                }

                match self.deliver(&job, &record).await {
                    Ok(ack) => {
                        debug!(job_id = %job.id, key = %record.key(), ?ack, "Record emitted");
                        self.settle_success(lease, 1, started);
                    }
                    Err(e) => self.settle_fatal(lease, e),
                }
            }
        }
    }

    /// Admission, then the fetch under the configured timeout
    async fn fetch(&self, lease: &Lease, url: &Url) -> Result<FetchedPage, Halt> {
        let job = &lease.job;
        let permit = self.throttle.acquire(&job.domain).await;
        if !self.still_held(lease, "admit") {
            permit.release(ReleaseOutcome::Aborted);
            return Err(Halt::LeaseLost);
        }
        debug!(job_id = %job.id, domain = %job.domain, "Admitted");

        let result = match tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(url, &job.domain)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.config.fetch_timeout)),
        };

        match result {
            Ok(page) if page.is_success() => {
                permit.release(ReleaseOutcome::Success);
                debug!(
                    job_id = %job.id,
                    status = page.status,
                    bytes = page.body.len(),
                    "Fetched"
                );
                Ok(page)
            }
            Ok(page) => {
                let kind = page.status_class.failure_kind().unwrap_or(FailureKind::Permanent);
                permit.release(ReleaseOutcome::Failure(kind));
                Err(Halt::Failed(Failure {
                    kind,
                    retry_hint: page.retry_after,
                    detail: format!("HTTP {}", page.status),
                }))
            }
            Err(e) => {
                let kind = e.failure_kind();
                permit.release(ReleaseOutcome::Failure(kind));
                Err(Failure::new(kind, e.to_string()).into())
            }
        }
    }

    /// Upsert with the sink backoff; the last error once attempts run out
    async fn deliver(&self, job: &Job, record: &CanonicalRecord) -> Result<SinkAck, SinkError> {
        let mut attempt = 1;
        loop {
            match self.sink.upsert(record).await {
                Ok(ack) => return Ok(ack),
                Err(e) => match self.config.retry.sink_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            job_id = %job.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Sink write failed, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Enqueue discovered links as children of `parent`; returns how many were new
    fn enqueue_children(&self, parent: &Job, links: Vec<DiscoveredLink>) -> usize {
        let parent_host = Url::parse(&parent.url).ok().and_then(|u| domain_of(&u));
        let mut enqueued = 0;

        for link in links {
            let domain = match domain_of(&link.url) {
                Some(host) if Some(&host) != parent_host.as_ref() => host,
                _ => parent.domain.clone(),
            };
            let child = Job::new(domain, link.url.as_str(), link.kind).with_parent(parent.id);

            match self.queue.enqueue(child) {
                Ok(EnqueueOutcome::Enqueued(_)) => enqueued += 1,
                Ok(EnqueueOutcome::Duplicate(existing)) => {
                    debug!(url = %link.url, existing = %existing, "Duplicate link skipped")
                }
                Ok(EnqueueOutcome::DomainCapReached) => {
                    debug!(url = %link.url, "Domain job cap reached, link skipped")
                }
                Err(e) => error!(url = %link.url, "Failed to enqueue discovered job: {}", e),
            }
        }

        if enqueued > 0 {
            self.report.lock().record_discovered(&parent.domain, enqueued);
            self.work_available.notify_waiters();
        }
        enqueued
    }

    fn settle_success(&self, lease: &Lease, records: usize, started: Instant) {
        let job = &lease.job;
        match self.queue.complete(lease) {
            Ok(()) => {
                self.report.lock().record_success(job, records);
                info!(
                    job_id = %job.id,
                    domain = %job.domain,
                    kind = %job.kind,
                    attempt = lease.attempt(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job succeeded"
                );
            }
            Err(e) => self.log_settle_error(job, "complete", e),
        }
    }

    fn settle_failure(&self, lease: &Lease, failure: Failure) {
        let job = &lease.job;
        let attempt = lease.attempt();
        let decision = self
            .config
            .retry
            .decide_with_hint(job, failure.kind, attempt, failure.retry_hint);

        match decision {
            RetryDecision::RetryAfter(delay) => match self.queue.retry(lease, failure.kind, delay) {
                Ok(()) => {
                    self.report.lock().record_retry(job, failure.kind);
                    info!(
                        job_id = %job.id,
                        domain = %job.domain,
                        attempt,
                        failure = %failure.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Retry scheduled: {}",
                        failure.detail
                    );
                    self.work_available.notify_waiters();
                }
                Err(e) => self.log_settle_error(job, "retry", e),
            },
            RetryDecision::Abandon { needs_review } => {
                match self.queue.abandon(lease, failure.kind, needs_review) {
                    Ok(()) => {
                        self.report.lock().record_abandon(job, failure.kind, needs_review);
                        if needs_review {
                            warn!(
                                job_id = %job.id,
                                domain = %job.domain,
                                url = %job.url,
                                failure = %failure.kind,
                                "Job abandoned, likely site layout change: {}",
                                failure.detail
                            );
                        } else {
                            info!(
                                job_id = %job.id,
                                domain = %job.domain,
                                attempt,
                                failure = %failure.kind,
                                "Job abandoned: {}",
                                failure.detail
                            );
                        }
                    }
                    Err(e) => self.log_settle_error(job, "abandon", e),
                }
            }
        }
    }

    /// Sink exhausted its retries: hand the job back and stop the run
    fn settle_fatal(&self, lease: &Lease, err: SinkError) {
        let job = &lease.job;
        self.report.lock().record_fatal(job);
        error!(job_id = %job.id, domain = %job.domain, "Sink failed after retries: {}", err);
        // Stop leasing before the job becomes pending again
        self.set_fatal(format!("sink failure on job {} ({}): {}", job.id, job.url, err));
        if let Err(e) = self.queue.release(lease) {
            self.log_settle_error(job, "release", e);
        }
    }

    fn log_settle_error(&self, job: &Job, op: &str, err: QueueError) {
        match err {
            QueueError::LeaseLost(id) => {
                warn!(job_id = %id, op, "Lease lost before the job settled; another worker owns it")
            }
            other => error!(job_id = %job.id, op, "Failed to settle job: {}", other),
        }
    }
}
