//! The append-only record of terminal outcomes.
//!
//! A job is moved here in the same atomic unit that removes it from the live
//! queue; entries are never mutated afterwards. Retention is an operator
//! concern (see [`crate::retention`]), never something the scheduler does on
//! its own.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId, JobStatus, UploadError};
use crate::metadata::ClipMetadata;
use crate::platform::Platform;

/// Immutable snapshot of a job at the moment it reached a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub job_id: JobId,
    pub platform: Platform,
    pub clip_path: PathBuf,
    pub metadata: ClipMetadata,
    /// Always terminal: `Succeeded`, `Failed`, `Abandoned`, or `Cancelled`.
    pub status: JobStatus,
    pub attempt: u16,
    pub errors: Vec<UploadError>,
    pub inserted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub(crate) fn snapshot(job: &Job, finished_at: DateTime<Utc>) -> Self {
        debug_assert!(job.status.is_terminal());
        Self {
            job_id: job.id,
            platform: job.platform,
            clip_path: job.clip_path.clone(),
            metadata: job.metadata.clone(),
            status: job.status,
            attempt: job.attempt,
            errors: job.errors.clone(),
            inserted_at: job.inserted_at,
            finished_at,
        }
    }

    pub fn last_error(&self) -> Option<&UploadError> {
        self.errors.last()
    }
}

/// Filter for history queries; results come back newest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryQuery {
    pub platform: Option<Platform>,
    pub limit: usize,
    pub before: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            platform: None,
            limit: 100,
            before: None,
        }
    }
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub(crate) fn matches(&self, entry: &HistoryEntry) -> bool {
        self.platform.map_or(true, |platform| entry.platform == platform)
            && self.before.map_or(true, |before| entry.finished_at < before)
    }
}
