//! Durable job state
//!
//! The whole job table is written as one JSON snapshot. Writes go to a temp
//! file that is fsynced and renamed over the previous snapshot, so a crash
//! mid-write leaves the last complete snapshot in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Job, JobState};

/// Errors reading or writing checkpoints
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No archive file configured")]
    NoArchive,
}

/// Persisted job table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Format version
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

impl CheckpointSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            jobs,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Return in-flight jobs whose lease lapsed before `now` to pending.
    ///
    /// Unexpired leases stay in place until they expire.
    pub fn reclaim_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut reclaimed = 0;
        for job in self.jobs.iter_mut().filter(|j| j.lease_expired(now)) {
            job.state = JobState::Pending;
            job.lease = None;
            job.updated_at = now;
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn count_in_state(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

/// Snapshot file plus optional terminal-job archive
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    archive_path: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_path: None,
        }
    }

    pub fn with_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }

    /// Load the snapshot; a missing file is an empty snapshot
    pub fn load(&self) -> Result<CheckpointSnapshot, CheckpointError> {
        if !self.path.exists() {
            debug!("No checkpoint at {}, starting empty", self.path.display());
            return Ok(CheckpointSnapshot::empty());
        }

        let json = fs::read_to_string(&self.path)?;
        let snapshot: CheckpointSnapshot = serde_json::from_str(&json)?;

        if snapshot.version > CheckpointSnapshot::CURRENT_VERSION {
            warn!(
                "Checkpoint version {} is newer than supported {}",
                snapshot.version,
                CheckpointSnapshot::CURRENT_VERSION
            );
        }

        Ok(snapshot)
    }

    /// Write the snapshot atomically
    pub fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_vec(snapshot)?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        debug!(jobs = snapshot.jobs.len(), "Checkpoint written to {}", self.path.display());
        Ok(())
    }

    /// Append jobs to the JSON-lines archive
    pub fn append_archive(&self, jobs: &[Job]) -> Result<usize, CheckpointError> {
        let path = self.archive_path.as_ref().ok_or(CheckpointError::NoArchive)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for job in jobs {
            serde_json::to_writer(&mut writer, job)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        Ok(jobs.len())
    }

    /// Read back archived jobs; empty when no archive is configured or written yet
    pub fn load_archive(&self) -> Result<Vec<Job>, CheckpointError> {
        let Some(ref path) = self.archive_path else {
            return Ok(Vec::new());
        };
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        for (lineno, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<Job>(line) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(line = lineno + 1, "Skipping unreadable archive line in {}: {}", path.display(), e),
            }
        }
        Ok(jobs)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
