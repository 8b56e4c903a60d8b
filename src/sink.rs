//! Canonical record sinks
//!
//! Delivery is at-least-once, so every sink treats a second upsert of the
//! same `(source site, hotel id, scrape timestamp)` key as a no-op.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SinkConfig;
use crate::types::{CanonicalRecord, FailureKind, RecordKey};

/// Errors from a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::SinkError
    }
}

/// Acknowledgement of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAck {
    /// Record stored
    Written,
    /// Key already stored; nothing written
    Duplicate,
}

/// Durable consumer of canonical records
#[async_trait]
pub trait Sink: Send + Sync {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<SinkAck, SinkError>;
}

// ============================================================================
// JSON lines
// ============================================================================

struct JsonlState {
    file: File,
    seen: HashSet<RecordKey>,
}

/// Appends one JSON line per record
pub struct JsonlSink {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlSink {
    /// Open (or create) the output file.
    ///
    /// Keys already present in the file are loaded so a resumed run does not
    /// write the same version twice.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let seen = load_existing_keys(&path).await?;
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        debug!(existing = seen.len(), "Opened JSONL sink at {}", path.display());

        Ok(Self {
            path,
            state: Mutex::new(JsonlState { file, seen }),
        })
    }

    pub async fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let path = config
            .jsonl_path
            .as_ref()
            .ok_or_else(|| SinkError::Unavailable("sink.jsonl_path is not set".to_string()))?;
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn load_existing_keys(path: &Path) -> Result<HashSet<RecordKey>, SinkError> {
    let mut seen = HashSet::new();
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(seen),
        Err(e) => return Err(e.into()),
    };

    for (lineno, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        match serde_json::from_str::<CanonicalRecord>(line) {
            Ok(record) => {
                seen.insert(record.key());
            }
            Err(e) => warn!(line = lineno + 1, "Skipping unreadable sink line in {}: {}", path.display(), e),
        }
    }
    Ok(seen)
}

#[async_trait]
impl Sink for JsonlSink {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<SinkAck, SinkError> {
        let key = record.key();
        let mut state = self.state.lock().await;
        if state.seen.contains(&key) {
            return Ok(SinkAck::Duplicate);
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        state.file.write_all(&line).await?;
        state.file.flush().await?;
        state.seen.insert(key);

        Ok(SinkAck::Written)
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Records kept in memory, keyed by version key
#[derive(Debug, Default)]
pub struct MemorySink {
    records: DashMap<RecordKey, CanonicalRecord>,
    upserts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records, ordered by key
    pub fn records(&self) -> Vec<CanonicalRecord> {
        let mut records: Vec<CanonicalRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.key());
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of upsert calls, duplicates included
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<SinkAck, SinkError> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        match self.records.entry(record.key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(SinkAck::Duplicate),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(SinkAck::Written)
            }
        }
    }
}
