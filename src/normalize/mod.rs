//! Raw record normalization
//!
//! Maps a site-native `RawRecord` onto the canonical hotel schema. The
//! normalizer is a pure function of its input and a rule table fixed at
//! construction; it never fabricates values, so every absent or unparseable
//! field becomes null.

pub mod address;
pub mod amenity;
pub mod currency;
pub mod rating;

pub use address::{clean_address, AddressParts};
pub use amenity::{Amenity, AmenityMapper, AmenityMatch};
pub use currency::{convert, detect_currency, parse_price};
pub use rating::{parse_review_count, parse_star_rating, rescale_review_score};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use url::Url;

use crate::config::NormalizeConfig;
use crate::types::{CanonicalRecord, FailureKind, GeoPoint, RawRecord, RoomRate};

/// Raw field names read by the normalizer
pub mod fields {
    pub const NAME: &str = "name";
    pub const HOTEL_NAME: &str = "hotel_name";
    pub const HOTEL_ID: &str = "hotel_id";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const ADDRESS: &str = "address";
    pub const LOCATION: &str = "location";
    pub const REGION: &str = "region";
    pub const COUNTRY: &str = "country";
    pub const STAR_RATING: &str = "star_rating";
    pub const REVIEW_SCORE: &str = "review_score";
    pub const REVIEW_SCALE: &str = "review_scale";
    pub const REVIEW_COUNT: &str = "review_count";
    pub const REVIEW_LABEL: &str = "review_label";
    pub const AMENITIES: &str = "amenities";
    pub const CANCELLATION_POLICY: &str = "cancellation_policy";
    pub const IMAGES: &str = "images";
    pub const PRICE: &str = "price";
    pub const ROOM_TYPE: &str = "room_type";
    pub const NIGHTS: &str = "nights";
    pub const PROVIDER: &str = "provider";
    /// Prefix of indexed rate fields: `rate.<n>.price`, `rate.<n>.room_type`, ...
    pub const RATE_PREFIX: &str = "rate.";
}

/// Raised only when a structurally required field is absent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Required field missing: {0}")]
    MissingField(&'static str),
}

impl NormalizationError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::NormalizationError
    }
}

/// RawRecord -> CanonicalRecord mapper
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizeConfig,
    target_currency: Option<String>,
    amenities: AmenityMapper,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizeConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        let target_currency = config
            .target_currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());
        Self {
            config,
            target_currency,
            amenities: AmenityMapper::new(),
        }
    }

    /// Normalize one raw record
    pub fn normalize(&self, raw: &RawRecord) -> Result<CanonicalRecord, NormalizationError> {
        let source_site = non_blank(&raw.source_site).ok_or(NormalizationError::MissingField("source_site"))?;
        let source_url = non_blank(&raw.source_url).ok_or(NormalizationError::MissingField("source_url"))?;
        let hotel_name = raw
            .field(fields::NAME)
            .or_else(|| raw.field(fields::HOTEL_NAME))
            .map(collapse_whitespace)
            .ok_or(NormalizationError::MissingField("hotel_name"))?;

        let base_url = Url::parse(source_url).ok();

        let hotel_id = raw
            .field(fields::HOTEL_ID)
            .map(str::to_string)
            .unwrap_or_else(|| match &base_url {
                Some(url) => crate::crawl::normalize_url(url),
                None => source_url.to_string(),
            });

        let location = raw
            .field(fields::ADDRESS)
            .or_else(|| raw.field(fields::LOCATION))
            .map(clean_address)
            .unwrap_or_default();
        let region = raw
            .field(fields::REGION)
            .map(collapse_whitespace)
            .or(location.region);
        let country = raw
            .field(fields::COUNTRY)
            .map(collapse_whitespace)
            .or(location.country);

        let review_score = raw
            .field(fields::REVIEW_SCORE)
            .and_then(|score| rescale_review_score(score, raw.field(fields::REVIEW_SCALE)));

        let amenity_match = self
            .amenities
            .map_all(raw.field(fields::AMENITIES).map(split_list).unwrap_or_default());

        Ok(CanonicalRecord {
            hotel_name,
            hotel_id,
            source_site: source_site.to_string(),
            geo: parse_geo(raw),
            address: location.address,
            region,
            country,
            star_rating: raw.field(fields::STAR_RATING).and_then(parse_star_rating),
            review_score,
            review_count: raw.field(fields::REVIEW_COUNT).and_then(parse_review_count),
            review_label: raw.field(fields::REVIEW_LABEL).map(collapse_whitespace),
            amenities: amenity_match.amenities,
            unmapped_amenities: amenity_match.unmapped,
            room_rates: self.room_rates(raw),
            cancellation_policy: raw.field(fields::CANCELLATION_POLICY).map(collapse_whitespace),
            image_urls: raw
                .field(fields::IMAGES)
                .map(|images| resolve_images(images, base_url.as_ref()))
                .unwrap_or_default(),
            scraped_at: raw.fetched_at,
            source_url: source_url.to_string(),
        })
    }

    /// Unindexed `price`/`room_type`/... first, then `rate.<n>.*` in index order
    fn room_rates(&self, raw: &RawRecord) -> Vec<RoomRate> {
        let default_currency = self
            .config
            .site_currencies
            .get(&raw.source_site)
            .map(String::as_str);

        let mut rates = Vec::new();
        if let Some(rate) = self.room_rate(raw, "", default_currency) {
            rates.push(rate);
        }

        let indexes: BTreeSet<u32> = raw
            .fields
            .keys()
            .filter_map(|key| key.strip_prefix(fields::RATE_PREFIX))
            .filter_map(|rest| rest.split('.').next())
            .filter_map(|index| index.parse::<u32>().ok())
            .collect();
        for index in indexes {
            let prefix = format!("{}{}.", fields::RATE_PREFIX, index);
            if let Some(rate) = self.room_rate(raw, &prefix, default_currency) {
                rates.push(rate);
            }
        }

        rates
    }

    fn room_rate(&self, raw: &RawRecord, prefix: &str, default_currency: Option<&str>) -> Option<RoomRate> {
        let get = |name: &str| raw.field(&format!("{}{}", prefix, name));

        let price = parse_price(get(fields::PRICE)?, default_currency);
        let (normalized_amount, normalized_currency) = match (&self.target_currency, price.amount, &price.currency) {
            (Some(target), Some(amount), Some(currency)) => {
                match convert(amount, currency, target, &self.config.exchange_rates) {
                    Some(converted) => (Some(converted), Some(target.clone())),
                    None => (None, None),
                }
            }
            _ => (None, None),
        };

        Some(RoomRate {
            room_type: get(fields::ROOM_TYPE).map(collapse_whitespace),
            price,
            normalized_amount,
            normalized_currency,
            nights: get(fields::NIGHTS).and_then(rating::first_number).and_then(|n| {
                (n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64).then_some(n as u32)
            }),
            provider: get(fields::PROVIDER).map(collapse_whitespace),
        })
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a list literal on newlines, `;`, `|` and `,`
fn split_list(s: &str) -> Vec<&str> {
    s.split(['\n', ';', '|', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_geo(raw: &RawRecord) -> Option<GeoPoint> {
    let latitude = raw.field(fields::LATITUDE)?.parse::<f64>().ok()?;
    let longitude = raw.field(fields::LONGITUDE)?.parse::<f64>().ok()?;
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    valid.then_some(GeoPoint { latitude, longitude })
}

/// Image list: relative URLs resolved against the page, non-http(s) dropped
fn resolve_images(images: &str, base: Option<&Url>) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .split(|c: char| c.is_whitespace() || c == '|')
        .filter(|s| !s.is_empty())
        .filter_map(|s| match base {
            Some(base) => base.join(s).ok(),
            None => Url::parse(s).ok(),
        })
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Indexed rate field names for building raw records in extractors and tests
pub fn rate_field(index: u32, name: &str) -> String {
    format!("{}{}.{}", fields::RATE_PREFIX, index, name)
}

/// Exchange-rate table lookups keyed by uppercase ISO code
pub fn exchange_rates_from<I, K>(pairs: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = (K, f64)>,
    K: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|(code, rate)| (code.as_ref().to_uppercase(), rate))
        .collect()
}
