//! Configuration for hotelcrawl
//!
//! Loaded from a single TOML file; every table is optional and falls back to
//! its defaults.

mod crawl;
mod logging;
mod normalize;

pub use crawl::{
    CheckpointConfig, CrawlConfig, DomainOverride, FetchConfig, RetryConfig, SinkConfig,
    ThrottleConfig,
};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use normalize::{FieldSpec, NormalizeConfig, SelectorConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default user agent for all outbound requests
pub const DEFAULT_USER_AGENT: &str = "hotelcrawl/0.1 (+https://github.com/hotelcrawl)";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    /// Selector tables keyed by domain
    #[serde(default)]
    pub extractors: BTreeMap<String, SelectorConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Crawl
        if self.crawl.workers == 0 {
            errors.push("crawl.workers must be positive".to_string());
        }
        if self.crawl.idle_poll_ms == 0 {
            errors.push("crawl.idle_poll_ms must be positive".to_string());
        }
        if self.crawl.lease_secs <= self.fetch.timeout_secs {
            errors.push(format!(
                "crawl.lease_secs ({}) must exceed fetch.timeout_secs ({})",
                self.crawl.lease_secs, self.fetch.timeout_secs
            ));
        }
        if self.crawl.max_jobs_per_domain == Some(0) {
            errors.push("crawl.max_jobs_per_domain must be positive when set".to_string());
        }

        // Throttle
        if self.throttle.max_concurrent_per_domain == 0 {
            errors.push("throttle.max_concurrent_per_domain must be positive".to_string());
        }
        if self.throttle.failure_threshold == 0 {
            errors.push("throttle.failure_threshold must be positive".to_string());
        }
        if self.throttle.cooldown_cap_ms < self.throttle.min_interval_ms {
            errors.push(format!(
                "throttle.cooldown_cap_ms ({}) must be >= throttle.min_interval_ms ({})",
                self.throttle.cooldown_cap_ms, self.throttle.min_interval_ms
            ));
        }
        for (domain, over) in &self.throttle.domains {
            if over.max_concurrent == Some(0) {
                errors.push(format!("throttle.domains.\"{}\".max_concurrent must be positive", domain));
            }
        }

        // Retry
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be positive".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push(format!(
                "retry.max_delay_ms ({}) must be >= retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            ));
        }

        // Fetch
        if self.fetch.timeout_secs == 0 {
            errors.push("fetch.timeout_secs must be positive".to_string());
        }
        if self.fetch.user_agent.trim().is_empty() {
            errors.push("fetch.user_agent must not be empty".to_string());
        }
        if let Some(ref proxy) = self.fetch.proxy {
            if url::Url::parse(proxy).is_err() {
                errors.push(format!("fetch.proxy is not a valid URL: {}", proxy));
            }
        }

        // Checkpoint
        if self.checkpoint.flush_every == 0 {
            errors.push("checkpoint.flush_every must be positive".to_string());
        }

        // Normalize
        for (code, rate) in &self.normalize.exchange_rates {
            if !rate.is_finite() || *rate <= 0.0 {
                errors.push(format!("normalize.exchange_rates.{} must be a positive number", code));
            }
        }
        if !self.normalize.exchange_rates.is_empty() && self.normalize.target_currency.is_none() {
            errors.push("normalize.exchange_rates requires normalize.target_currency".to_string());
        }

        // Extractors
        for (domain, selectors) in &self.extractors {
            if selectors.fields.is_empty()
                && selectors.detail_link.is_none()
                && selectors.pagination_link.is_none()
            {
                errors.push(format!("extractors.\"{}\" defines no selectors", domain));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(Config::default().validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.crawl.workers, 4);
        assert_eq!(cfg.throttle.failure_threshold, 3);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.checkpoint.flush_every, 32);
        assert_eq!(cfg.logging.level, LogLevel::Info);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg = Config::from_toml_str(
            r#"
[crawl]
workers = 8

[throttle]
min_interval_ms = 250

[throttle.domains."slow.example"]
max_concurrent = 1
min_interval_ms = 5000

[retry]
max_attempts = 5
"#,
        )
        .unwrap();

        assert_eq!(cfg.crawl.workers, 8);
        assert_eq!(cfg.crawl.lease_secs, 300);
        assert_eq!(cfg.throttle.min_interval_ms, 250);
        assert_eq!(cfg.throttle.max_concurrent_per_domain, 2);
        let slow = cfg.throttle.domains.get("slow.example").unwrap();
        assert_eq!(slow.max_concurrent, Some(1));
        assert_eq!(slow.min_interval_ms, Some(5000));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
    }

    #[test]
    fn extractor_tables_parse_shorthand_and_detailed_fields() {
        let cfg = Config::from_toml_str(
            r#"
[extractors."hotels.example"]
detail_link = "a.hotel-link"

[extractors."hotels.example".fields]
name = ".hotel-name"
star_rating = { selector = ".fa-star", count = true }
images = { selector = "img.gallery", attr = "src", multiple = true }
"#,
        )
        .unwrap();

        let site = cfg.extractors.get("hotels.example").unwrap();
        assert_eq!(site.fields.get("name"), Some(&FieldSpec::Css(".hotel-name".to_string())));
        assert!(matches!(
            site.fields.get("star_rating"),
            Some(FieldSpec::Detailed { count: true, .. })
        ));
        assert_eq!(site.required, vec!["name".to_string()]);
        assert_eq!(site.detail_link.as_deref(), Some("a.hotel-link"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = Config::default();
        cfg.crawl.workers = 0;
        cfg.retry.max_attempts = 0;
        cfg.throttle.max_concurrent_per_domain = 0;

        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("crawl.workers must be positive"), "{}", msg);
        assert!(msg.contains("retry.max_attempts must be positive"), "{}", msg);
        assert!(msg.contains("throttle.max_concurrent_per_domain must be positive"), "{}", msg);
    }

    #[test]
    fn validate_rejects_lease_shorter_than_fetch_timeout() {
        let mut cfg = Config::default();
        cfg.crawl.lease_secs = 10;
        cfg.fetch.timeout_secs = 30;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("must exceed fetch.timeout_secs"), "{}", msg);
    }

    #[test]
    fn validate_rejects_rates_without_target_currency() {
        let mut cfg = Config::default();
        cfg.normalize.exchange_rates.insert("USD".to_string(), 0.92);
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("requires normalize.target_currency"), "{}", msg);
    }

    #[test]
    fn load_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
        assert!(err.chain().any(|cause| cause.downcast_ref::<std::io::Error>().is_some()));
    }

    #[test]
    fn load_keeps_parse_error_as_cause() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hotelcrawl.toml");
        std::fs::write(&path, "[crawl]\nworkers = 0\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid config file"), "{}", err);
        let full = format!("{:#}", err);
        assert!(full.contains("workers"), "{}", full);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hotelcrawl.toml");
        std::fs::write(&path, "[crawl]\nworkers = 2\n[logging]\nformat = \"json\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.crawl.workers, 2);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn logging_filter_string_appends_directives() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.filter_string(), "info");
        logging.level = LogLevel::Debug;
        logging.directives = Some("reqwest=warn".to_string());
        assert_eq!(logging.filter_string(), "debug,reqwest=warn");
    }
}
