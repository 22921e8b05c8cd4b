use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::ClipMetadata;
use crate::platform::Platform;
use crate::uploader::FailureKind;

pub mod builder;

/// Identifier of a job, assigned by the store at enqueue time.
#[derive(
    Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash, Serialize, Deserialize,
)]
pub struct JobId(i64);

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// One clip's pending publish action for one platform.
///
/// The scheduler is the only writer of `status`, `attempt`, and `errors` after
/// creation. The clip path and metadata are opaque payload: they are carried
/// to the uploader untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub platform: Platform,
    pub clip_path: PathBuf,
    pub metadata: ClipMetadata,
    pub status: JobStatus,
    /// Earliest instant at which the job may be dispatched. Never moves
    /// earlier once set: retries only push it forward.
    pub scheduled_at: DateTime<Utc>,
    /// Number of dispatch attempts so far, incremented when an attempt starts.
    pub attempt: u16,
    pub max_attempts: u16,
    pub errors: Vec<UploadError>,
    /// Hash of `(platform, clip_path)`; two live jobs may not share one.
    pub dedupe_key: u64,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The most recent classified failure, if any.
    pub fn last_error(&self) -> Option<&UploadError> {
        self.errors.last()
    }

    /// Whether the last attempt was blocked on manual operator action.
    pub fn awaiting_intervention(&self) -> bool {
        self.status == JobStatus::Retrying
            && self
                .last_error()
                .is_some_and(|error| error.kind == FailureKind::NeedsIntervention)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Retrying,
    Succeeded,
    Failed,
    Abandoned,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses admit no further transition; the job only lives on
    /// as a history entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Abandoned | JobStatus::Cancelled
        )
    }
}

/// A classified failure recorded against a job attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadError {
    pub attempt: u16,
    pub kind: FailureKind,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Abandoned.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }
}
