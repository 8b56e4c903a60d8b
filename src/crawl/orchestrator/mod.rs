//! Crawl orchestrator
//!
//! Owns the worker pool. Each worker leases a job from the shared queue, waits
//! for domain admission, fetches, extracts, normalizes and delivers the
//! record, then settles the job through the retry policy. A worker that dies
//! mid-job simply lets its lease lapse; the queue hands the job to someone
//! else, so there is no separate crash detection.

mod types;
mod worker;

pub use types::*;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::extractor::ExtractorRegistry;
use super::fetcher::{Fetcher, HttpFetcher};
use super::queue::{EnqueueOutcome, JobQueue};
use super::throttle::DomainThrottle;
use crate::config::Config;
use crate::normalize::Normalizer;
use crate::sink::Sink;
use crate::types::JobState;

/// Crawl orchestrator shared by its workers
pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: Arc<JobQueue>,
    throttle: DomainThrottle,
    fetcher: Arc<dyn Fetcher>,
    extractors: ExtractorRegistry,
    /// Rule tables are read-only, so workers share one instance
    normalizer: Arc<Normalizer>,
    sink: Arc<dyn Sink>,
    /// Cleared by `drain`
    accepting: AtomicBool,
    /// Set when workers must stop leasing
    stopping: AtomicBool,
    running: AtomicBool,
    fatal: Mutex<Option<String>>,
    report: Mutex<RunReport>,
    /// Signalled when jobs are enqueued or become eligible
    work_available: Notify,
    /// Signalled whenever a job settles
    progress: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<JobQueue>,
        fetcher: Arc<dyn Fetcher>,
        extractors: ExtractorRegistry,
        normalizer: Normalizer,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let throttle = DomainThrottle::new(config.throttle.clone());
        Self {
            config,
            queue,
            throttle,
            fetcher,
            extractors,
            normalizer: Arc::new(normalizer),
            sink,
            accepting: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            fatal: Mutex::new(None),
            report: Mutex::new(RunReport::default()),
            work_available: Notify::new(),
            progress: Notify::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Wire up the HTTP fetcher, selector extractors, checkpointed queue and
    /// normalizer described by `config`.
    pub fn from_config(config: &Config, sink: Arc<dyn Sink>) -> anyhow::Result<Self> {
        let queue = JobQueue::from_config(&config.crawl, &config.checkpoint)?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let extractors = ExtractorRegistry::from_config(&config.extractors)?;
        let normalizer = Normalizer::new(config.normalize.clone());

        info!(
            workers = config.crawl.workers,
            sites = extractors.len(),
            "Orchestrator configured"
        );

        Ok(Self::new(
            OrchestratorConfig::from_config(config),
            Arc::new(queue),
            Arc::new(fetcher),
            extractors,
            normalizer,
            sink,
        ))
    }

    /// Enqueue top-level jobs.
    ///
    /// Seeds whose normalized URL is already known come back as
    /// `EnqueueOutcome::Duplicate`.
    pub fn submit(
        &self,
        seeds: impl IntoIterator<Item = SeedJob>,
    ) -> Result<Vec<EnqueueOutcome>, OrchestratorError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(OrchestratorError::Draining);
        }

        let jobs = seeds
            .into_iter()
            .map(SeedJob::into_job)
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.queue.enqueue(job)?);
        }

        let accepted = outcomes
            .iter()
            .filter(|o| matches!(o, EnqueueOutcome::Enqueued(_)))
            .count();
        info!(submitted = outcomes.len(), accepted, "Seed jobs submitted");

        self.work_available.notify_waiters();
        Ok(outcomes)
    }

    /// Start `workers` concurrent workers (the configured count when 0).
    pub fn run(self: &Arc<Self>, workers: usize) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let count = if workers == 0 { self.config.workers } else { workers };
        let reclaimed = self.queue.reclaim_expired()?;
        info!(workers = count, reclaimed, "Starting crawl workers");

        let mut handles = self.workers.lock();
        for index in 0..count {
            let orchestrator = Arc::clone(self);
            let name = format!("worker-{}", index);
            handles.push(tokio::spawn(async move {
                orchestrator.worker_loop(name).await;
            }));
        }
        Ok(())
    }

    /// Drain with the configured timeout
    pub async fn drain_default(&self) -> DrainReport {
        self.drain(self.config.drain_timeout).await
    }

    /// Stop accepting submissions and wait until every job is terminal, a
    /// fatal condition occurs, or `timeout` elapses.
    ///
    /// Workers still busy when drain gives up are aborted; their jobs stay
    /// `in_flight` and return to `pending` once the lease lapses.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.accepting.store(false, Ordering::Release);
        info!(timeout_ms = timeout.as_millis() as u64, "Draining");

        let timed_out = tokio::time::timeout(timeout, self.wait_until_settled())
            .await
            .is_err();

        self.stopping.store(true, Ordering::Release);
        self.work_available.notify_waiters();

        let fatal = self.fatal.lock().clone();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if timed_out || fatal.is_some() {
            for handle in &handles {
                handle.abort();
            }
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Worker task failed: {}", e);
                }
            }
        }
        self.running.store(false, Ordering::Release);

        let queue = Arc::clone(&self.queue);
        match tokio::task::spawn_blocking(move || queue.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Final checkpoint flush failed: {}", e),
            Err(e) => warn!("Final checkpoint flush task failed: {}", e),
        }

        let report = DrainReport {
            report: self.report(),
            in_flight: self.queue.ids_in_state(JobState::InFlight),
            pending: self.queue.ids_in_state(JobState::Pending),
            timed_out,
            fatal,
        };

        info!(
            succeeded = report.report.succeeded(),
            abandoned = report.report.abandoned_count(),
            records = report.report.records_emitted,
            in_flight = report.in_flight.len(),
            pending = report.pending.len(),
            timed_out,
            "Drain finished"
        );
        report
    }

    async fn wait_until_settled(&self) {
        loop {
            let progressed = self.progress.notified();
            if self.fatal.lock().is_some() || self.queue.is_settled() {
                return;
            }
            tokio::select! {
                _ = progressed => {}
                _ = tokio::time::sleep(self.config.idle_poll) => {}
            }
        }
    }

    /// Snapshot of the run report so far
    pub fn report(&self) -> RunReport {
        self.report.lock().clone()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn throttle(&self) -> &DomainThrottle {
        &self.throttle
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fatal diagnostic, if the run was stopped early
    pub fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn set_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(message);
        }
        drop(fatal);
        self.stopping.store(true, Ordering::Release);
        self.work_available.notify_waiters();
        self.progress.notify_waiters();
    }
}
