//! Job queue with leases
//!
//! Owns every `Job` for the lifetime of a run. Pending jobs are indexed per
//! domain by `(next_eligible_at, created_at, id)` and leased round-robin across
//! domains, so one slow domain never starves the rest. Every state transition
//! happens under one lock; a lease is checked by token, so a worker whose
//! lease was reclaimed cannot complete the job afterwards.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointSnapshot, CheckpointStore};
use super::normalize_url;
use crate::config::{CheckpointConfig, CrawlConfig};
use crate::types::{FailureKind, Job, JobId, JobState, LeaseInfo};

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Lease on job {0} is no longer held")]
    LeaseLost(JobId),

    #[error("Job {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result of offering a job to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(JobId),
    /// A job for the same normalized URL already exists
    Duplicate(JobId),
    /// The domain already holds `max_jobs_per_domain` jobs
    DomainCapReached,
}

/// A worker's claim on one in-flight job
#[derive(Debug, Clone)]
pub struct Lease {
    /// The job as it was when leased
    pub job: Job,
    pub token: Uuid,
}

impl Lease {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    /// Attempt number this lease represents (1-based)
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }
}

/// Job counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub abandoned: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.succeeded + self.abandoned
    }

    /// Nothing left to lease or finish
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Dedup hash of a job URL
fn dedup_key(url: &str) -> u64 {
    let normalized = Url::parse(url.trim())
        .map(|u| normalize_url(&u))
        .unwrap_or_else(|_| url.trim().to_string());
    xxhash_rust::xxh3::xxh3_64(normalized.as_bytes())
}

type ReadyKey = (DateTime<Utc>, DateTime<Utc>, JobId);

fn ready_key(job: &Job) -> ReadyKey {
    (job.next_eligible_at, job.created_at, job.id)
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Pending jobs per domain, earliest eligible first
    ready: HashMap<String, BTreeSet<ReadyKey>>,
    /// Domains in first-seen order, walked round-robin
    domains: Vec<String>,
    cursor: usize,
    /// In-flight leases by expiry
    leases: BTreeSet<(DateTime<Utc>, JobId)>,
    seen: HashMap<u64, JobId>,
    per_domain: HashMap<String, usize>,
    /// Bumped on every mutation
    generation: u64,
    /// Mutations since the last snapshot was taken
    unflushed: usize,
}

impl QueueState {
    fn touch(&mut self) {
        self.generation += 1;
        self.unflushed += 1;
    }

    /// Count a job against dedup and the per-domain cap
    fn remember(&mut self, job: &Job) {
        self.seen.entry(dedup_key(&job.url)).or_insert(job.id);
        *self.per_domain.entry(job.domain.clone()).or_insert(0) += 1;
    }

    /// Register a job in every index according to its state
    fn insert(&mut self, job: Job) {
        self.remember(&job);
        if !self.ready.contains_key(&job.domain) {
            self.ready.insert(job.domain.clone(), BTreeSet::new());
            self.domains.push(job.domain.clone());
        }

        match job.state {
            JobState::Pending => {
                if let Some(set) = self.ready.get_mut(&job.domain) {
                    set.insert(ready_key(&job));
                }
            }
            JobState::InFlight => {
                if let Some(ref lease) = job.lease {
                    self.leases.insert((lease.expires_at, job.id));
                }
            }
            JobState::Succeeded | JobState::Abandoned => {}
        }

        self.jobs.insert(job.id, job);
    }

    fn make_ready(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get(&id) {
            self.ready
                .entry(job.domain.clone())
                .or_default()
                .insert(ready_key(job));
        }
    }

    /// Pop the next eligible job id, rotating across domains
    fn take_next(&mut self, now: DateTime<Utc>) -> Option<JobId> {
        let n = self.domains.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            let Some(set) = self.ready.get_mut(&self.domains[idx]) else {
                continue;
            };
            let Some(first) = set.first().copied() else {
                continue;
            };
            if first.0 > now {
                continue;
            }
            set.remove(&first);
            self.cursor = (idx + 1) % n;
            return Some(first.2);
        }
        None
    }

    /// Return jobs with lapsed leases to pending
    fn reclaim(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let expired: Vec<(DateTime<Utc>, JobId)> = self
            .leases
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .copied()
            .collect();

        let mut reclaimed = Vec::new();
        for entry in expired {
            self.leases.remove(&entry);
            let id = entry.1;
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if !job.lease_expired(now) {
                continue;
            }
            let owner = job.lease.take().map(|l| l.owner).unwrap_or_default();
            job.state = JobState::Pending;
            job.updated_at = now;
            warn!(job_id = %id, domain = %job.domain, owner = %owner, "Lease expired, job returned to pending");
            reclaimed.push(id);
        }

        for id in &reclaimed {
            self.make_ready(*id);
        }
        reclaimed
    }

    fn lease(
        &mut self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Lease, QueueError> {
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !job.state.can_transition_to(JobState::InFlight) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.state,
                to: JobState::InFlight,
            });
        }

        let token = Uuid::new_v4();
        let expires_at = now + to_chrono(duration);
        job.state = JobState::InFlight;
        job.attempts += 1;
        job.lease = Some(LeaseInfo {
            token,
            owner: owner.to_string(),
            expires_at,
        });
        job.updated_at = now;
        let snapshot = job.clone();

        self.leases.insert((expires_at, id));
        Ok(Lease {
            job: snapshot,
            token,
        })
    }

    /// Push a held, unexpired lease out to `now + duration`
    fn renew(
        &mut self,
        lease: &Lease,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<DateTime<Utc>, QueueError> {
        let id = lease.id();
        let expires_at = now + to_chrono(duration);
        let previous = {
            let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            if job.lease_expired(now) {
                return Err(QueueError::LeaseLost(id));
            }
            match job.lease.as_mut() {
                Some(info) if job.state == JobState::InFlight && info.token == lease.token => {
                    std::mem::replace(&mut info.expires_at, expires_at)
                }
                _ => return Err(QueueError::LeaseLost(id)),
            }
        };

        self.leases.remove(&(previous, id));
        self.leases.insert((expires_at, id));
        Ok(expires_at)
    }

    /// Check the lease is still held and move the job to `next`
    fn settle(&mut self, lease: &Lease, next: JobState, now: DateTime<Utc>) -> Result<&mut Job, QueueError> {
        let id = lease.id();
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        let held = job.state == JobState::InFlight
            && job.lease.as_ref().map(|l| l.token) == Some(lease.token);
        if !held {
            return Err(QueueError::LeaseLost(id));
        }
        if !job.state.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.state,
                to: next,
            });
        }

        if let Some(info) = job.lease.take() {
            self.leases.remove(&(info.expires_at, id));
        }
        job.state = next;
        job.updated_at = now;
        Ok(job)
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::InFlight => counts.in_flight += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    fn sorted_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }
}

/// Write `snapshot` unless a newer generation is already on disk.
///
/// Writers are serialized on `written`; an older snapshot never overwrites a
/// newer one.
fn write_snapshot(
    store: &CheckpointStore,
    written: &Mutex<Option<u64>>,
    generation: u64,
    snapshot: &CheckpointSnapshot,
) -> Result<(), CheckpointError> {
    let mut written = written.lock();
    if matches!(*written, Some(w) if w >= generation) {
        return Ok(());
    }
    store.save(snapshot)?;
    *written = Some(generation);
    Ok(())
}

/// Process-wide job queue, shared by reference with every worker
pub struct JobQueue {
    state: Mutex<QueueState>,
    store: Option<Arc<CheckpointStore>>,
    /// Generation of the last snapshot written to disk
    written: Arc<Mutex<Option<u64>>>,
    lease_duration: Duration,
    flush_every: usize,
    max_jobs_per_domain: Option<usize>,
}

impl JobQueue {
    fn with_state(state: QueueState, store: Option<CheckpointStore>) -> Self {
        let defaults = CrawlConfig::default();
        Self {
            state: Mutex::new(state),
            store: store.map(Arc::new),
            written: Arc::new(Mutex::new(None)),
            lease_duration: defaults.lease_duration(),
            flush_every: 1,
            max_jobs_per_domain: None,
        }
    }

    /// Queue with no durable state
    pub fn in_memory() -> Self {
        Self::with_state(QueueState::default(), None)
    }

    /// Load the queue from a checkpoint, reclaiming lapsed leases.
    ///
    /// Archived jobs are read back for deduplication and the per-domain cap
    /// only; they are never leased again.
    pub fn open(store: CheckpointStore) -> Result<Self, QueueError> {
        let mut snapshot = store.load()?;
        let reclaimed = snapshot.reclaim_expired(Utc::now());
        let archived = store.load_archive()?;

        let mut state = QueueState::default();
        for job in snapshot.jobs {
            state.insert(job);
        }
        // A crash between archiving and the next snapshot leaves a job in both
        for job in archived.iter() {
            if !state.jobs.contains_key(&job.id) {
                state.remember(job);
            }
        }
        if reclaimed > 0 {
            state.touch();
        }

        let counts = state.counts();
        info!(
            total = counts.total(),
            pending = counts.pending,
            in_flight = counts.in_flight,
            succeeded = counts.succeeded,
            abandoned = counts.abandoned,
            reclaimed,
            archived = archived.len(),
            "Loaded checkpoint from {}",
            store.path().display()
        );

        Ok(Self::with_state(state, Some(store)))
    }

    /// Build from config: durable when a checkpoint path is set
    pub fn from_config(crawl: &CrawlConfig, checkpoint: &CheckpointConfig) -> Result<Self, QueueError> {
        let queue = match checkpoint.path {
            Some(ref path) => {
                let mut store = CheckpointStore::new(path);
                if let Some(ref archive) = checkpoint.archive_path {
                    store = store.with_archive(archive);
                }
                Self::open(store)?
            }
            None => Self::in_memory(),
        };

        Ok(queue
            .with_lease_duration(crawl.lease_duration())
            .with_flush_every(checkpoint.flush_every)
            .with_max_jobs_per_domain(crawl.max_jobs_per_domain))
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_flush_every(mut self, transitions: usize) -> Self {
        self.flush_every = transitions.max(1);
        self
    }

    pub fn with_max_jobs_per_domain(mut self, cap: Option<usize>) -> Self {
        self.max_jobs_per_domain = cap;
        self
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Add a job unless its normalized URL is already known.
    ///
    /// The per-domain cap applies to discovered jobs only; seeds are always
    /// accepted.
    pub fn enqueue(&self, mut job: Job) -> Result<EnqueueOutcome, QueueError> {
        let key = dedup_key(&job.url);
        let outcome = {
            let mut state = self.state.lock();

            if let Some(existing) = state.seen.get(&key) {
                return Ok(EnqueueOutcome::Duplicate(*existing));
            }

            if job.parent.is_some() {
                if let Some(cap) = self.max_jobs_per_domain {
                    if state.per_domain.get(&job.domain).copied().unwrap_or(0) >= cap {
                        return Ok(EnqueueOutcome::DomainCapReached);
                    }
                }
            }

            job.state = JobState::Pending;
            job.lease = None;
            let id = job.id;
            debug!(job_id = %id, domain = %job.domain, kind = %job.kind, url = %job.url, "Job enqueued");
            state.insert(job);
            state.touch();
            EnqueueOutcome::Enqueued(id)
        };

        self.maybe_flush()?;
        Ok(outcome)
    }

    /// Lease the next eligible job for `owner`
    pub fn lease_next(&self, owner: &str) -> Result<Option<Lease>, QueueError> {
        self.lease_next_at(owner, Utc::now())
    }

    /// Lease the next job eligible at `now`, reclaiming lapsed leases first
    pub fn lease_next_at(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Lease>, QueueError> {
        let lease = {
            let mut state = self.state.lock();
            let reclaimed = state.reclaim(now);
            if !reclaimed.is_empty() {
                state.touch();
            }

            match state.take_next(now) {
                Some(id) => {
                    let lease = state.lease(id, owner, now, self.lease_duration)?;
                    state.touch();
                    Some(lease)
                }
                None => None,
            }
        };

        self.maybe_flush()?;
        Ok(lease)
    }

    /// Extend a held lease by the lease duration.
    ///
    /// Fails with `LeaseLost` once the lease has lapsed or been reclaimed, so
    /// the caller knows another worker may own the job. Renewals are not
    /// flushed on their own.
    pub fn renew(&self, lease: &Lease) -> Result<DateTime<Utc>, QueueError> {
        self.renew_at(lease, Utc::now())
    }

    pub fn renew_at(&self, lease: &Lease, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        self.state.lock().renew(lease, now, self.lease_duration)
    }

    /// Mark a leased job succeeded
    pub fn complete(&self, lease: &Lease) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            state.settle(lease, JobState::Succeeded, Utc::now())?;
            state.touch();
        }
        self.maybe_flush()
    }

    /// Return a leased job to pending, eligible after `delay`
    pub fn retry(&self, lease: &Lease, kind: FailureKind, delay: Duration) -> Result<(), QueueError> {
        self.retry_at(lease, kind, delay, Utc::now())
    }

    pub fn retry_at(
        &self,
        lease: &Lease,
        kind: FailureKind,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            let job = state.settle(lease, JobState::Pending, now)?;
            job.last_error = Some(kind);
            if matches!(kind, FailureKind::ParseFailure | FailureKind::NormalizationError) {
                job.parse_failures += 1;
            }
            job.next_eligible_at = now + to_chrono(delay);
            state.make_ready(lease.id());
            state.touch();
        }
        self.maybe_flush()
    }

    /// Give up on a leased job
    pub fn abandon(&self, lease: &Lease, kind: FailureKind, needs_review: bool) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            let job = state.settle(lease, JobState::Abandoned, Utc::now())?;
            job.last_error = Some(kind);
            job.needs_review = needs_review;
            state.touch();
        }
        self.maybe_flush()
    }

    /// Hand a leased job back untouched, eligible immediately
    pub fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            let now = Utc::now();
            let job = state.settle(lease, JobState::Pending, now)?;
            job.next_eligible_at = now;
            state.make_ready(lease.id());
            state.touch();
        }
        self.maybe_flush()
    }

    /// Return every lapsed lease to pending
    pub fn reclaim_expired(&self) -> Result<usize, QueueError> {
        self.reclaim_expired_at(Utc::now())
    }

    pub fn reclaim_expired_at(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let reclaimed = {
            let mut state = self.state.lock();
            let reclaimed = state.reclaim(now).len();
            if reclaimed > 0 {
                state.touch();
            }
            reclaimed
        };
        self.maybe_flush()?;
        Ok(reclaimed)
    }

    /// Earliest time any pending job becomes eligible
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock();
        state
            .ready
            .values()
            .filter_map(|set| set.first().map(|k| k.0))
            .min()
    }

    pub fn counts(&self) -> QueueCounts {
        self.state.lock().counts()
    }

    /// No pending and no in-flight jobs
    pub fn is_settled(&self) -> bool {
        self.counts().is_settled()
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// All jobs, oldest first
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().sorted_jobs()
    }

    /// Ids of jobs currently in `state`, oldest first
    pub fn ids_in_state(&self, state: JobState) -> Vec<JobId> {
        self.state
            .lock()
            .sorted_jobs()
            .into_iter()
            .filter(|j| j.state == state)
            .map(|j| j.id)
            .collect()
    }

    fn take_snapshot(&self) -> (u64, CheckpointSnapshot) {
        let mut state = self.state.lock();
        state.unflushed = 0;
        (state.generation, CheckpointSnapshot::new(state.sorted_jobs()))
    }

    /// Write a snapshot now, on the calling thread (no-op for in-memory queues)
    pub fn flush(&self) -> Result<(), QueueError> {
        let Some(ref store) = self.store else {
            return Ok(());
        };
        let (generation, snapshot) = self.take_snapshot();
        write_snapshot(store, &self.written, generation, &snapshot)?;
        Ok(())
    }

    /// Flush once `flush_every` transitions have accumulated.
    ///
    /// Inside a tokio runtime the write runs on the blocking pool and its
    /// errors are logged; outside one it runs inline.
    fn maybe_flush(&self) -> Result<(), QueueError> {
        let Some(ref store) = self.store else {
            return Ok(());
        };
        if self.state.lock().unflushed < self.flush_every {
            return Ok(());
        }

        let (generation, snapshot) = self.take_snapshot();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(store);
                let written = Arc::clone(&self.written);
                handle.spawn_blocking(move || {
                    if let Err(e) = write_snapshot(&store, &written, generation, &snapshot) {
                        error!(generation, "Checkpoint write failed: {}", e);
                    }
                });
                Ok(())
            }
            Err(_) => {
                write_snapshot(store, &self.written, generation, &snapshot)?;
                Ok(())
            }
        }
    }

    /// Move terminal jobs to the archive file and drop them from the snapshot.
    ///
    /// Their URLs stay known for deduplication and keep counting toward the
    /// per-domain cap; `open` reads the archive back for both.
    pub fn archive_terminal(&self) -> Result<usize, QueueError> {
        let store = self.store.as_ref().ok_or(CheckpointError::NoArchive)?;
        if store.archive_path().is_none() {
            return Err(CheckpointError::NoArchive.into());
        }

        let terminal: Vec<Job> = self
            .state
            .lock()
            .sorted_jobs()
            .into_iter()
            .filter(|j| j.state.is_terminal())
            .collect();
        if terminal.is_empty() {
            return Ok(0);
        }

        store.append_archive(&terminal)?;
        {
            let mut state = self.state.lock();
            for job in &terminal {
                state.jobs.remove(&job.id);
            }
            state.touch();
        }
        self.flush()?;

        info!(archived = terminal.len(), "Archived terminal jobs");
        Ok(terminal.len())
    }
}
