//! Provides the durable, file-backed implementation of [`JobStore`].
//!
//! The entire store is one JSON document inside the state directory. Every
//! mutation rewrites the document through a write-to-temp-then-rename
//! sequence with an fsync in between, so a crash at any point leaves either
//! the previous document or the new one on disk, never a half-written state.
//! Terminal transitions (live table to history) are part of the same
//! document and therefore the same atomic write.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
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

const STATE_FILE: &str = "state.json";
const TEMP_FILE: &str = "state.json.tmp";

/// A [`JobStore`] persisted as a single JSON document in a state directory.
#[derive(Clone)]
pub struct FileStore {
    state: Arc<RwLock<StoreState>>,
    path: PathBuf,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

impl FileStore {
    /// Opens the store in `state_dir`, creating the directory and an empty
    /// document if none exists yet.
    ///
    /// A leftover temp file from an interrupted write is ignored: only the
    /// committed document is ever read.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(STATE_FILE);
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(err) => return Err(err.into()),
        };
        let store = Self {
            state: Arc::new(RwLock::new(state)),
            path,
        };
        let guard = store.state.read().map_err(|_| StoreError::BadState)?;
        store.persist(&guard)?;
        drop(guard);
        Ok(store)
    }

    /// Applies `mutate` to a copy of the document, commits it to disk, and
    /// only then publishes it in memory. An error anywhere leaves both the
    /// file and the in-memory state untouched.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.write().map_err(|_| StoreError::BadState)?;
        let mut next = guard.clone();
        let value = mutate(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(value)
    }

    fn read<T>(&self, view: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let guard = self.state.read().map_err(|_| StoreError::BadState)?;
        Ok(view(&guard))
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let temp = self.path.with_file_name(TEMP_FILE);
        let bytes = serde_json::to_vec_pretty(state)?;
        let mut file = fs::File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        self.commit(|state| state.enqueue(job, Utc::now()))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        self.read(|state| state.list_due(now))
    }

    async fn mark_in_progress(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.commit(|state| state.mark_in_progress(id, now))
    }

    async fn record_outcome(&self, id: JobId, decision: RetryDecision) -> Result<Job, StoreError> {
        self.commit(|state| state.record_outcome(id, decision, Utc::now()))
    }

    async fn cancel(&self, id: JobId) -> Result<Job, StoreError> {
        self.commit(|state| state.cancel(id, Utc::now()))
    }

    async fn recover(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        self.commit(|state| Ok(state.recover(now)))
    }

    async fn queue(&self, platform: Option<Platform>) -> Result<Vec<Job>, StoreError> {
        self.read(|state| state.queue(platform))
    }

    async fn history(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        self.read(|state| state.history(query))
    }

    async fn timing(&self) -> Result<BTreeMap<Platform, PlatformTimingState>, StoreError> {
        self.read(|state| state.timing())
    }

    async fn prune_history(&self, spec: &RetentionSpec) -> Result<usize, StoreError> {
        self.commit(|state| Ok(state.prune_history(spec)))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    use super::*;
    use crate::job::JobStatus;
    use crate::store::testing::mock_job;
    use crate::store_test_suite;

    store_test_suite!(setup: {
        let dir = tempfile::tempdir().unwrap();
        (FileStore::open(dir.path()).unwrap(), dir)
    });

    #[tokio::test]
    async fn reopening_sees_committed_state() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let job = store
            .enqueue(mock_job(Platform::Instagram, "clip.mp4"))
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        let queue = reopened.queue(None).await.unwrap();
        assert_eq!(queue, vec![job]);
    }

    #[tokio::test]
    async fn reopening_after_crash_recovers_interrupted_job() {
        let dir = tempfile::tempdir().unwrap();
        let dispatched_at = Utc::now();

        let store = FileStore::open(dir.path()).unwrap();
        let job = store
            .enqueue(mock_job(Platform::TikTok, "clip.mp4"))
            .await
            .unwrap();
        store.mark_in_progress(job.id, dispatched_at).await.unwrap();
        // The process dies here without ever observing the outcome.
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        let now = Utc::now();
        let recovered = reopened.recover(now).await.unwrap();
        assert_eq!(recovered, vec![job.id]);

        let queue = reopened.queue(None).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].status, JobStatus::Retrying);
        assert_eq!(queue[0].attempt, 1);
        assert_eq!(queue[0].scheduled_at, now);
        assert!(reopened.history(Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stray_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let job = store
            .enqueue(mock_job(Platform::YouTube, "clip.mp4"))
            .await
            .unwrap();
        drop(store);

        // Simulate a crash mid-write: a half-written temp file next to the
        // committed document.
        std::fs::write(dir.path().join("state.json.tmp"), b"{\"next_id\": 9").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        let queue = reopened.queue(None).await.unwrap();
        assert_eq!(queue, vec![job]);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_not_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), b"not json").unwrap();

        assert_matches!(FileStore::open(dir.path()), Err(StoreError::EncodeDecode(_)));
    }

    #[tokio::test]
    async fn failed_mutation_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let job = store
            .enqueue(mock_job(Platform::Instagram, "clip.mp4"))
            .await
            .unwrap();
        let duplicate = store.enqueue(mock_job(Platform::Instagram, "clip.mp4")).await;
        assert_matches!(duplicate, Err(StoreError::DuplicateJob(id)) if id == job.id);

        drop(store);
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.queue(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn schedule_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let scheduled_at = Utc::now() + TimeDelta::minutes(90);

        let store = FileStore::open(dir.path()).unwrap();
        let mut job = mock_job(Platform::Instagram, "clip.mp4");
        job.scheduled_at = scheduled_at;
        store.enqueue(job).await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        let timing = reopened.timing().await.unwrap();
        assert_eq!(
            timing[&Platform::Instagram].last_planned_at,
            Some(scheduled_at)
        );
        assert!(reopened.list_due(Utc::now()).await.unwrap().is_empty());
    }
}
