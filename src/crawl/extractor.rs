//! Per-site extraction
//!
//! An `Extractor` turns a fetched page into a `RawRecord` (detail pages) or a
//! list of follow-up links (listing pages). Extractors are resolved by domain
//! through the `ExtractorRegistry`; the orchestrator never sees concrete site
//! logic. `SelectorExtractor` is the generic CSS-selector implementation driven
//! by the `[extractors."<domain>"]` config tables.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::{FieldSpec, SelectorConfig};
use crate::types::{FailureKind, JobKind, RawRecord};

/// Errors during extraction
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("No extractor registered for domain '{0}'")]
    NoExtractor(String),
}

impl ExtractError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::MissingFields(_) | Self::Parse(_) => FailureKind::ParseFailure,
            Self::InvalidSelector { .. } | Self::NoExtractor(_) => FailureKind::Permanent,
        }
    }
}

/// A fetched page handed to an extractor
#[derive(Debug, Clone)]
pub struct Page {
    /// URL after redirects
    pub url: Url,
    pub domain: String,
    pub kind: JobKind,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A link found on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: Url,
    pub kind: JobKind,
}

/// Site-specific parsing capability
pub trait Extractor: Send + Sync {
    /// Extract a site-native record from a detail page.
    fn extract(&self, page: &Page) -> Result<RawRecord, ExtractError>;

    /// Find detail and pagination links on a listing page.
    fn discover_links(&self, page: &Page) -> Result<Vec<DiscoveredLink>, ExtractError>;
}

/// Extractors keyed by domain
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `SelectorExtractor`s for every configured site
    pub fn from_config(sites: &BTreeMap<String, SelectorConfig>) -> Result<Self, ExtractError> {
        let mut registry = Self::new();
        for (domain, config) in sites {
            let extractor = SelectorExtractor::new(domain.clone(), config)?;
            registry.register(domain.clone(), Arc::new(extractor));
        }
        Ok(registry)
    }

    pub fn register(&mut self, domain: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(domain.into().to_lowercase(), extractor);
    }

    /// Resolve the extractor for a domain, trying with and without `www.`
    pub fn get(&self, domain: &str) -> Result<Arc<dyn Extractor>, ExtractError> {
        let domain = domain.to_lowercase();
        let alternate = match domain.strip_prefix("www.") {
            Some(bare) => bare.to_string(),
            None => format!("www.{}", domain),
        };

        self.extractors
            .get(&domain)
            .or_else(|| self.extractors.get(&alternate))
            .cloned()
            .ok_or(ExtractError::NoExtractor(domain))
    }

    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        domains.sort_unstable();
        domains
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

struct CompiledField {
    name: String,
    selector: Selector,
    attr: Option<String>,
    multiple: bool,
    count: bool,
}

/// CSS-selector driven extractor
pub struct SelectorExtractor {
    source_site: String,
    fields: Vec<CompiledField>,
    detail_link: Option<Selector>,
    pagination_link: Option<Selector>,
    required: Vec<String>,
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl SelectorExtractor {
    pub fn new(source_site: impl Into<String>, config: &SelectorConfig) -> Result<Self, ExtractError> {
        let fields = config
            .fields
            .iter()
            .map(|(name, spec)| {
                let field = match spec {
                    FieldSpec::Css(selector) => CompiledField {
                        name: name.clone(),
                        selector: compile(selector)?,
                        attr: None,
                        multiple: false,
                        count: false,
                    },
                    FieldSpec::Detailed {
                        selector,
                        attr,
                        multiple,
                        count,
                    } => CompiledField {
                        name: name.clone(),
                        selector: compile(selector)?,
                        attr: attr.clone(),
                        multiple: *multiple,
                        count: *count,
                    },
                };
                Ok(field)
            })
            .collect::<Result<Vec<_>, ExtractError>>()?;

        Ok(Self {
            source_site: source_site.into(),
            fields,
            detail_link: config.detail_link.as_deref().map(compile).transpose()?,
            pagination_link: config.pagination_link.as_deref().map(compile).transpose()?,
            required: config.required.clone(),
        })
    }

    fn read_field(field: &CompiledField, document: &Html) -> Option<String> {
        if field.count {
            let n = document.select(&field.selector).count();
            return (n > 0).then(|| n.to_string());
        }

        let mut values = document
            .select(&field.selector)
            .filter_map(|el| element_value(el, field.attr.as_deref()));

        if field.multiple {
            let all: Vec<String> = values.collect();
            (!all.is_empty()).then(|| all.join("\n"))
        } else {
            values.next()
        }
    }

    fn links(document: &Html, selector: &Selector, base: &Url, kind: JobKind, seen: &mut HashSet<String>) -> Vec<DiscoveredLink> {
        document
            .select(selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base.join(href.trim()).ok())
            .filter(|url| url.scheme() == "http" || url.scheme() == "https")
            .filter(|url| seen.insert(url.as_str().to_string()))
            .map(|url| DiscoveredLink { url, kind })
            .collect()
    }
}

/// Attribute or text of an element; text keeps line structure with each line trimmed
fn element_value(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    let raw = match attr {
        Some(name) => el.value().attr(name)?.to_string(),
        None => el.text().collect::<String>(),
    };

    let cleaned = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    (!cleaned.is_empty()).then_some(cleaned)
}

impl Extractor for SelectorExtractor {
    fn extract(&self, page: &Page) -> Result<RawRecord, ExtractError> {
        let document = Html::parse_document(&page.body);

        let mut record = RawRecord::new(&self.source_site, page.url.as_str(), page.fetched_at);
        for field in &self.fields {
            if let Some(value) = Self::read_field(field, &document) {
                record.fields.insert(field.name.clone(), value);
            }
        }

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| record.field(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ExtractError::MissingFields(missing));
        }

        Ok(record)
    }

    fn discover_links(&self, page: &Page) -> Result<Vec<DiscoveredLink>, ExtractError> {
        let document = Html::parse_document(&page.body);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        if let Some(ref selector) = self.detail_link {
            links.extend(Self::links(&document, selector, &page.url, JobKind::Detail, &mut seen));
        }
        if let Some(ref selector) = self.pagination_link {
            links.extend(Self::links(&document, selector, &page.url, JobKind::Listing, &mut seen));
        }

        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_HTML: &str = r#"
        <html><body>
          <h2 class="pp-header__title">Hotel Azul</h2>
          <span class="address">Hotel in Lisbon,
              Portugal  Show on Map</span>
          <div class="stars"><span class="star"></span><span class="star"></span><span class="star"></span></div>
          <div class="score">8.2</div>
          <ul class="facilities"><li>Free WiFi</li><li> Parking </li><li></li></ul>
          <img class="gallery" src="/img/1.jpg"><img class="gallery" src="https://cdn.example.test/2.jpg">
        </body></html>
    "#;

    const LISTING_HTML: &str = r#"
        <html><body>
          <a class="hotel-link" href="/hotel/1">One</a>
          <a class="hotel-link" href="/hotel/2#rooms">Two</a>
          <a class="hotel-link" href="/hotel/1">One again</a>
          <a class="hotel-link" href="mailto:desk@example.test">Mail</a>
          <a class="next" href="?page=2">Next</a>
        </body></html>
    "#;

    fn config() -> SelectorConfig {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldSpec::Css(".pp-header__title".to_string()));
        fields.insert("address".to_string(), FieldSpec::Css(".address".to_string()));
        fields.insert(
            "star_rating".to_string(),
            FieldSpec::Detailed {
                selector: ".stars .star".to_string(),
                attr: None,
                multiple: false,
                count: true,
            },
        );
        fields.insert("review_score".to_string(), FieldSpec::Css(".score".to_string()));
        fields.insert("review_count".to_string(), FieldSpec::Css(".review-count".to_string()));
        fields.insert(
            "amenities".to_string(),
            FieldSpec::Detailed {
                selector: ".facilities li".to_string(),
                attr: None,
                multiple: true,
                count: false,
            },
        );
        fields.insert(
            "images".to_string(),
            FieldSpec::Detailed {
                selector: "img.gallery".to_string(),
                attr: Some("src".to_string()),
                multiple: true,
                count: false,
            },
        );
        SelectorConfig {
            fields,
            detail_link: Some("a.hotel-link".to_string()),
            pagination_link: Some("a.next".to_string()),
            required: vec!["name".to_string()],
        }
    }

    fn page(kind: JobKind, body: &str) -> Page {
        Page {
            url: Url::parse("https://example.test/search?city=lisbon").unwrap(),
            domain: "example.test".to_string(),
            kind,
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_extract_detail_fields() {
        let extractor = SelectorExtractor::new("example.test", &config()).unwrap();
        let raw = extractor.extract(&page(JobKind::Detail, DETAIL_HTML)).unwrap();

        assert_eq!(raw.source_site, "example.test");
        assert_eq!(raw.field("name"), Some("Hotel Azul"));
        assert_eq!(raw.field("address"), Some("Hotel in Lisbon,\nPortugal Show on Map"));
        assert_eq!(raw.field("star_rating"), Some("3"));
        assert_eq!(raw.field("review_score"), Some("8.2"));
        assert_eq!(raw.field("amenities"), Some("Free WiFi\nParking"));
        assert_eq!(
            raw.field("images"),
            Some("/img/1.jpg\nhttps://cdn.example.test/2.jpg")
        );
        // Missing selectors produce missing fields, never empty strings
        assert!(!raw.fields.contains_key("review_count"));
    }

    #[test]
    fn test_missing_required_field() {
        let extractor = SelectorExtractor::new("example.test", &config()).unwrap();
        let err = extractor
            .extract(&page(JobKind::Detail, "<html><body><p>Maintenance</p></body></html>"))
            .unwrap_err();

        assert!(matches!(err, ExtractError::MissingFields(ref f) if f == &vec!["name".to_string()]));
        assert_eq!(err.failure_kind(), FailureKind::ParseFailure);
    }

    #[test]
    fn test_discover_links() {
        let extractor = SelectorExtractor::new("example.test", &config()).unwrap();
        let links = extractor.discover_links(&page(JobKind::Listing, LISTING_HTML)).unwrap();

        let details: Vec<&str> = links
            .iter()
            .filter(|l| l.kind == JobKind::Detail)
            .map(|l| l.url.as_str())
            .collect();
        assert_eq!(
            details,
            vec!["https://example.test/hotel/1", "https://example.test/hotel/2#rooms"]
        );

        let pages: Vec<&str> = links
            .iter()
            .filter(|l| l.kind == JobKind::Listing)
            .map(|l| l.url.as_str())
            .collect();
        assert_eq!(pages, vec!["https://example.test/search?page=2"]);
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut cfg = config();
        cfg.fields.insert("name".to_string(), FieldSpec::Css("[[[".to_string()));
        let err = SelectorExtractor::new("example.test", &cfg).err().unwrap();
        assert!(matches!(err, ExtractError::InvalidSelector { .. }));
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
    }

    #[test]
    fn test_registry_resolves_by_domain() {
        let mut sites = BTreeMap::new();
        sites.insert("www.hotels.example".to_string(), config());
        let registry = ExtractorRegistry::from_config(&sites).unwrap();

        assert!(registry.get("www.hotels.example").is_ok());
        assert!(registry.get("hotels.example").is_ok());
        let err = registry.get("unknown.example").err().unwrap();
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
        assert_eq!(registry.domains(), vec!["www.hotels.example"]);
    }
}
