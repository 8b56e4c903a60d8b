//! Crawl, throttle, retry, fetch, checkpoint and sink configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::DEFAULT_USER_AGENT;

/// Worker pool and job lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// How long a worker's lease on a job lasts (seconds)
    pub lease_secs: u64,
    /// Default timeout for `drain()` (seconds)
    pub drain_timeout_secs: u64,
    /// Upper bound on how long an idle worker sleeps before polling again (milliseconds)
    pub idle_poll_ms: u64,
    /// Maximum jobs accepted per domain (None = unlimited)
    pub max_jobs_per_domain: Option<usize>,
}

impl CrawlConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_secs: 300,
            drain_timeout_secs: 120,
            idle_poll_ms: 250,
            max_jobs_per_domain: None,
        }
    }
}

/// Per-domain override of the throttle defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOverride {
    pub max_concurrent: Option<usize>,
    pub min_interval_ms: Option<u64>,
}

/// Per-domain admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Default concurrency ceiling per domain
    pub max_concurrent_per_domain: usize,
    /// Default minimum spacing between request starts (milliseconds)
    pub min_interval_ms: u64,
    /// Consecutive failures before the interval starts doubling
    pub failure_threshold: u32,
    /// Cap on the cooled-down interval (milliseconds)
    pub cooldown_cap_ms: u64,
    /// Overrides keyed by domain
    pub domains: BTreeMap<String, DomainOverride>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_domain: 2,
            min_interval_ms: 1000,
            failure_threshold: 3,
            cooldown_cap_ms: 30_000,
            domains: BTreeMap::new(),
        }
    }
}

/// Retry/backoff settings shared by fetch and sink failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts (including the first) before a job is abandoned
    pub max_attempts: u32,
    /// Backoff base (milliseconds)
    pub base_delay_ms: u64,
    /// Backoff cap (milliseconds)
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay (milliseconds)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_ms: 250,
        }
    }
}

/// HTTP fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Wall-clock bound on a whole fetch (seconds)
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_content_bytes: usize,
    pub max_redirects: usize,
    /// Egress proxy URL; all requests go through it when set
    pub proxy: Option<String>,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_content_bytes: 10 * 1024 * 1024, // 10 MB
            max_redirects: 10,
            proxy: None,
        }
    }
}

/// Durable job state settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Snapshot file; None keeps the queue in memory only
    pub path: Option<PathBuf>,
    /// Flush after this many state transitions
    pub flush_every: usize,
    /// JSON-lines file that receives archived terminal jobs
    pub archive_path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(".hotelcrawl/checkpoint.json")),
            flush_every: 32,
            archive_path: None,
        }
    }
}

/// Record sink settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// JSON-lines output file
    pub jsonl_path: Option<PathBuf>,
}
