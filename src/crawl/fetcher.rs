//! Page fetching
//!
//! `Fetcher` is the egress seam: one request for one URL. `HttpFetcher` is the
//! reqwest implementation, optionally routed through a proxy. Every HTTP
//! response comes back as a `FetchedPage` carrying its `StatusClass`; only
//! transport problems are `FetchError`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::config::FetchConfig;
use crate::types::FailureKind;

/// Transport-level fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Blocked by remote: {0}")]
    Blocked(String),
    #[error("Content too large: {0} bytes")]
    ContentTooLarge(usize),
    #[error("Failed to parse URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::Connection(_) => FailureKind::TransientNetwork,
            Self::Blocked(_) => FailureKind::RateLimited,
            Self::ContentTooLarge(_) | Self::InvalidUrl(_) => FailureKind::Permanent,
            Self::Http(e) if e.is_builder() => FailureKind::Permanent,
            Self::Http(_) => FailureKind::TransientNetwork,
        }
    }
}

/// Coarse class of an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx
    Success,
    /// 429
    RateLimited,
    /// 401, 403
    AccessDenied,
    /// 404, 410
    NotFound,
    /// Any other 4xx (and unexpected 1xx/3xx)
    ClientError,
    /// 5xx
    ServerError,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            429 => Self::RateLimited,
            401 | 403 => Self::AccessDenied,
            404 | 410 => Self::NotFound,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    /// Failure this status represents, None for success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success => None,
            Self::RateLimited => Some(FailureKind::RateLimited),
            Self::ServerError => Some(FailureKind::TransientNetwork),
            Self::AccessDenied | Self::NotFound | Self::ClientError => Some(FailureKind::Permanent),
        }
    }
}

/// One fetched response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub status_class: StatusClass,
    pub body: String,
    /// Minimum delay the server asked for before the next request
    pub retry_after: Option<Duration>,
    pub fetch_duration: Duration,
}

impl FetchedPage {
    /// Build a page from a status and body, classifying the status
    pub fn new(final_url: Url, status: u16, body: impl Into<String>) -> Self {
        Self {
            final_url,
            status,
            status_class: StatusClass::from_status(status),
            body: body.into(),
            retry_after: None,
            fetch_duration: Duration::ZERO,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status_class == StatusClass::Success
    }
}

/// Performs one request for one URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, which belongs to throttling domain `domain`.
    async fn fetch(&self, url: &Url, domain: &str) -> Result<FetchedPage, FetchError>;
}

/// Fetch statistics
#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    pub total_fetches: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_fetch_time_ms: f64,
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_content_bytes: usize,
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_time_ms: AtomicU64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true);

        if let Some(ref proxy) = config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout: config.timeout(),
            max_content_bytes: config.max_content_bytes,
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
        })
    }

    /// Get statistics
    pub fn stats(&self) -> FetchStats {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let total_time = self.total_time_ms.load(Ordering::Relaxed);
        FetchStats {
            total_fetches: total,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            avg_fetch_time_ms: if successes > 0 {
                total_time as f64 / successes as f64
            } else {
                0.0
            },
        }
    }

    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if e.is_connect() {
            FetchError::Connection(e.to_string())
        } else {
            FetchError::Http(e)
        }
    }

    async fn fetch_http(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        if let Some(len) = response.content_length() {
            if len as usize > self.max_content_bytes {
                return Err(FetchError::ContentTooLarge(len as usize));
            }
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        if body.len() > self.max_content_bytes {
            return Err(FetchError::ContentTooLarge(body.len()));
        }

        let mut page = FetchedPage::new(final_url, status, body);
        page.retry_after = retry_after;
        page.fetch_duration = start.elapsed();
        Ok(page)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, domain: &str) -> Result<FetchedPage, FetchError> {
        self.total.fetch_add(1, Ordering::Relaxed);

        let result = self.fetch_http(url).await;
        match &result {
            Ok(page) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.total_time_ms
                    .fetch_add(page.fetch_duration.as_millis() as u64, Ordering::Relaxed);
                tracing::debug!(
                    domain,
                    url = %url,
                    status = page.status,
                    bytes = page.body.len(),
                    "Fetched page"
                );
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(domain, url = %url, error = %e, "Fetch failed");
            }
        }
        result
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
