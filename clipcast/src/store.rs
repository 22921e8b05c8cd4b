//! Durable storage for the live job queue and the history log.
//!
//! All state the scheduler relies on lives behind the [`JobStore`] trait:
//! the live job table, the append-only history, and the per-platform timing
//! map. Implementations must make every mutation atomic with respect to a
//! process crash: a write either fully lands or is fully absent, and a
//! terminal transition moves the job from the live table into history in one
//! unit, never leaving it in both or neither.
//!
//! Two implementations are provided: [`memory::InMemoryStore`] for tests and
//! [`file::FileStore`] for production use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::history::{HistoryEntry, HistoryQuery};
use crate::job::{Job, JobId, JobStatus};
use crate::metadata::ClipMetadata;
use crate::platform::Platform;
use crate::retention::RetentionSpec;
use crate::retry::RetryDecision;
use crate::timing::PlatformTimingState;

pub mod file;
pub mod memory;
pub(crate) mod state;
pub mod testing;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// A job as handed to [`JobStore::enqueue`], before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub platform: Platform,
    pub clip_path: PathBuf,
    pub metadata: ClipMetadata,
    pub scheduled_at: DateTime<Utc>,
    pub stagger_index: u32,
    pub max_attempts: u16,
    pub dedupe_key: u64,
}

impl NewJob {
    /// The identity of a publish action: one clip going to one platform.
    pub fn dedupe_key_for(platform: Platform, clip_path: &Path) -> u64 {
        fxhash::hash64(&(platform, clip_path))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A live job for the same clip and platform already exists.
    #[error("a live job for this clip and platform already exists as {0}")]
    DuplicateJob(JobId),
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// The job is not in a status that admits the requested transition.
    #[error("job {id} is {status:?}: cannot {operation}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        operation: &'static str,
    },
    /// Another job for the platform is already in flight; uploaders share a
    /// browser session per platform and must not run concurrently.
    #[error("platform {platform} already has an upload in flight")]
    PlatformBusy { platform: Platform },
    #[error("error encoding or decoding persisted state")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("error reading or writing persisted state")]
    Io(#[from] std::io::Error),
    #[error("store in bad state")]
    BadState,
}

/// The persistence contract the scheduler runs against.
#[async_trait]
pub trait JobStore: Clone {
    /// Persists a new job as `Queued` and assigns its id.
    ///
    /// Fails with [`StoreError::DuplicateJob`] when a live job carries the
    /// same dedupe key.
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// All `Queued`/`Retrying` jobs with `scheduled_at <= now`, ordered by
    /// `scheduled_at` ascending, ties broken by insertion order.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// Starts a dispatch attempt: increments the attempt counter, stamps the
    /// platform's dispatch time, and moves the job to `InProgress`.
    ///
    /// Fails with [`StoreError::PlatformBusy`] while another job for the same
    /// platform is in flight; that is backpressure, not an error condition.
    async fn mark_in_progress(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Applies a retry-policy decision to an `InProgress` job. Terminal
    /// decisions move the job into history atomically.
    async fn record_outcome(&self, id: JobId, decision: RetryDecision) -> Result<Job, StoreError>;

    /// Cancels a `Queued`/`Retrying` job. A job already dispatched runs to
    /// completion and cannot be cancelled.
    async fn cancel(&self, id: JobId) -> Result<Job, StoreError>;

    /// Re-queues jobs found `InProgress` after a restart: their attempt's
    /// outcome was never observed, so they are presumed lost and become
    /// `Retrying` at `now` with the attempt count unchanged.
    async fn recover(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError>;

    /// The live queue, optionally filtered by platform, in dispatch order.
    async fn queue(&self, platform: Option<Platform>) -> Result<Vec<Job>, StoreError>;

    /// Terminal outcomes, newest first.
    async fn history(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError>;

    /// The per-platform timing map used by the timing policy.
    async fn timing(&self) -> Result<BTreeMap<Platform, PlatformTimingState>, StoreError>;

    /// Removes history entries matching the retention spec; returns how many
    /// were removed. Only ever invoked by the operator-configured retention
    /// runner.
    async fn prune_history(&self, spec: &RetentionSpec) -> Result<usize, StoreError>;
}
