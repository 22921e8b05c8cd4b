//! Provides an in-memory implementation of [`JobStore`].
//!
//! It holds no durable state and therefore cannot honor crash recovery
//! across processes; it is provided as a correct implementation for use in
//! tests and single-shot tooling, not for production scheduling.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::history::{HistoryEntry, HistoryQuery};
use crate::job::{Job, JobId};
use crate::platform::Platform;
use crate::retention::RetentionSpec;
use crate::retry::RetryDecision;
use crate::timing::PlatformTimingState;

use super::state::StoreState;
use super::{JobStore, NewJob, StoreError};

/// An in-memory implementation of [`JobStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new, empty instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::BadState)?
            .enqueue(job, Utc::now())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .state
            .read()
            .map_err(|_| StoreError::BadState)?
            .list_due(now))
    }

    async fn mark_in_progress(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::BadState)?
            .mark_in_progress(id, now)
    }

    async fn record_outcome(&self, id: JobId, decision: RetryDecision) -> Result<Job, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::BadState)?
            .record_outcome(id, decision, Utc::now())
    }

    async fn cancel(&self, id: JobId) -> Result<Job, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::BadState)?
            .cancel(id, Utc::now())
    }

    async fn recover(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        Ok(self
            .state
            .write()
            .map_err(|_| StoreError::BadState)?
            .recover(now))
    }

    async fn queue(&self, platform: Option<Platform>) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .state
            .read()
            .map_err(|_| StoreError::BadState)?
            .queue(platform))
    }

    async fn history(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .map_err(|_| StoreError::BadState)?
            .history(query))
    }

    async fn timing(&self) -> Result<BTreeMap<Platform, PlatformTimingState>, StoreError> {
        Ok(self
            .state
            .read()
            .map_err(|_| StoreError::BadState)?
            .timing())
    }

    async fn prune_history(&self, spec: &RetentionSpec) -> Result<usize, StoreError> {
        Ok(self
            .state
            .write()
            .map_err(|_| StoreError::BadState)?
            .prune_history(spec))
    }
}
