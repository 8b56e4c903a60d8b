//! hotelcrawl: crawl orchestrator and normalization pipeline for hotel data
//!
//! - Leased, checkpointed job queue with per-domain round-robin scheduling
//! - Per-domain admission throttle with adaptive cooldown
//! - Pure retry decisions over a fixed failure taxonomy
//! - Pluggable fetchers, per-site extractors and record sinks
//! - Deterministic normalization of site-native records (ratings, prices,
//!   amenities, addresses) onto one canonical schema

pub mod config;
pub mod crawl;
pub mod logging;
pub mod normalize;
pub mod sink;
pub mod types;

pub use config::Config;
pub use crawl::{
    DrainReport, Extractor, ExtractorRegistry, Fetcher, JobQueue, Orchestrator, OrchestratorConfig,
    RunReport, SeedJob,
};
pub use normalize::{Amenity, NormalizationError, Normalizer};
pub use sink::{JsonlSink, MemorySink, Sink, SinkAck, SinkError};
pub use types::*;
