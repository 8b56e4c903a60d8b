//! Core types shared by the crawl orchestrator and the normalizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::normalize::Amenity;

/// Unique identifier for a job
pub type JobId = Uuid;

// ============================================================================
// Jobs
// ============================================================================

/// What a job fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Search/listing page that yields links to detail pages
    Listing,
    /// Single hotel page that yields one record
    Detail,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing => f.write_str("listing"),
            Self::Detail => f.write_str("detail"),
        }
    }
}

/// Lifecycle state of a job
///
/// Transitions only along `pending -> in_flight -> {succeeded | pending | abandoned}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InFlight,
    Succeeded,
    Abandoned,
}

impl JobState {
    /// Whether the job will never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::Abandoned)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Exclusive, time-bounded claim held by a worker on an in-flight job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Token identifying this particular lease
    pub token: Uuid,
    /// Worker that holds the lease
    pub owner: String,
    /// When the lease lapses and the job returns to pending
    pub expires_at: DateTime<Utc>,
}

/// Unit of scraping work against a single URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Throttling unit and extractor key
    pub domain: String,
    pub url: String,
    pub kind: JobKind,
    /// Job that discovered this one (None for seeds)
    pub parent: Option<JobId>,
    pub state: JobState,
    /// Number of times this job has been leased
    pub attempts: u32,
    /// Number of attempts that ended in a parse failure
    #[serde(default)]
    pub parse_failures: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: Option<FailureKind>,
    /// Set when the job was abandoned for a likely site-layout change
    #[serde(default)]
    pub needs_review: bool,
    pub lease: Option<LeaseInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job eligible immediately
    pub fn new(domain: impl Into<String>, url: impl Into<String>, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            url: url.into(),
            kind,
            parent: None,
            state: JobState::Pending,
            attempts: 0,
            parse_failures: 0,
            next_eligible_at: now,
            last_error: None,
            needs_review: false,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the parent job
    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether the job is pending and eligible at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_eligible_at <= now
    }

    /// Whether the job is in flight with a lease that lapsed before `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::InFlight
            && self.lease.as_ref().map(|l| l.expires_at <= now).unwrap_or(true)
    }
}

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Classification of every failure a job can hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Timeout, connection reset, 5xx
    TransientNetwork,
    /// 429 or an explicit block signal
    RateLimited,
    /// Extractor could not locate expected fields
    ParseFailure,
    /// 404, access denied, no extractor for the domain
    Permanent,
    /// Required canonical field missing after extraction
    NormalizationError,
    /// Sink refused the record
    SinkError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient-network",
            Self::RateLimited => "rate-limited",
            Self::ParseFailure => "parse-failure",
            Self::Permanent => "permanent",
            Self::NormalizationError => "normalization-error",
            Self::SinkError => "sink-error",
        }
    }

    /// Whether the owning domain's health counter should move
    pub fn counts_against_domain(&self) -> bool {
        matches!(self, Self::TransientNetwork | Self::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Site-native extracted data, string-typed, straight from an extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_site: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Create an empty raw record
    pub fn new(
        source_site: impl Into<String>,
        source_url: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_site: source_site.into(),
            source_url: source_url.into(),
            fetched_at,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field value, with blank values treated as absent
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A parsed price
///
/// `amount` and `currency` are both set or both null; `original` always
/// keeps the literal as scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub original: String,
}

/// One bookable room offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRate {
    pub room_type: Option<String>,
    pub price: Price,
    /// Price converted to the configured target currency, when a rate is known
    pub normalized_amount: Option<f64>,
    pub normalized_currency: Option<String>,
    pub nights: Option<u32>,
    /// Booking provider the offer came from
    pub provider: Option<String>,
}

/// Version key of a canonical record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source_site: String,
    pub hotel_id: String,
    pub scraped_at: DateTime<Utc>,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.source_site, self.hotel_id, self.scraped_at.to_rfc3339())
    }
}

/// The normalized hotel entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub hotel_name: String,
    pub hotel_id: String,
    pub source_site: String,
    pub geo: Option<GeoPoint>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    /// 0-5 inclusive
    pub star_rating: Option<f32>,
    /// Review score rescaled to 0-5
    pub review_score: Option<f64>,
    pub review_count: Option<u32>,
    pub review_label: Option<String>,
    pub amenities: Vec<Amenity>,
    /// Amenity phrases with no vocabulary match, kept for taxonomy work
    pub unmapped_amenities: Vec<String>,
    pub room_rates: Vec<RoomRate>,
    pub cancellation_policy: Option<String>,
    pub image_urls: Vec<String>,
    pub scraped_at: DateTime<Utc>,
    pub source_url: String,
}

impl CanonicalRecord {
    /// Version key: (source site, hotel id, scrape timestamp)
    pub fn key(&self) -> RecordKey {
        RecordKey {
            source_site: self.source_site.clone(),
            hotel_id: self.hotel_id.clone(),
            scraped_at: self.scraped_at,
        }
    }
}
