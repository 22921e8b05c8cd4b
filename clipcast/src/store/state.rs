//! The shared transition core behind both store implementations.
//!
//! [`StoreState`] is the full persisted document: live jobs, terminal
//! history, the per-platform timing map, and the id counter. Keeping all of
//! it in one document lets a terminal transition (remove from the live table,
//! append to history) commit as a single write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{HistoryEntry, HistoryQuery};
use crate::job::{Job, JobId, JobStatus};
use crate::platform::Platform;
use crate::retention::{KeepBy, RetentionSpec};
use crate::retry::RetryDecision;
use crate::store::{NewJob, StoreError};
use crate::timing::PlatformTimingState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    next_id: i64,
    jobs: Vec<Job>,
    history: Vec<HistoryEntry>,
    platforms: BTreeMap<Platform, PlatformTimingState>,
}

impl StoreState {
    pub fn enqueue(&mut self, new: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        if let Some(existing) = self.jobs.iter().find(|job| job.dedupe_key == new.dedupe_key) {
            return Err(StoreError::DuplicateJob(existing.id));
        }
        self.next_id += 1;
        let job = Job {
            id: JobId::from(self.next_id),
            platform: new.platform,
            clip_path: new.clip_path,
            metadata: new.metadata,
            status: JobStatus::Queued,
            scheduled_at: new.scheduled_at,
            attempt: 0,
            max_attempts: new.max_attempts,
            errors: Vec::new(),
            dedupe_key: new.dedupe_key,
            inserted_at: now,
            updated_at: now,
            attempted_at: None,
        };
        let timing = self.platforms.entry(new.platform).or_default();
        timing.last_planned_at = Some(
            timing
                .last_planned_at
                .map_or(new.scheduled_at, |at| at.max(new.scheduled_at)),
        );
        timing.stagger_index = new.stagger_index;
        self.jobs.push(job.clone());
        self.assert_invariants();
        Ok(job)
    }

    pub fn list_due(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut due: Vec<_> = self
            .jobs
            .iter()
            .filter(|job| {
                matches!(job.status, JobStatus::Queued | JobStatus::Retrying)
                    && job.scheduled_at <= now
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.inserted_at.cmp(&b.inserted_at))
                .then(a.id.cmp(&b.id))
        });
        due
    }

    pub fn mark_in_progress(&mut self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.job(id)?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Retrying) {
            return Err(StoreError::InvalidState {
                id,
                status: job.status,
                operation: "dispatch",
            });
        }
        let platform = job.platform;
        if self
            .jobs
            .iter()
            .any(|other| other.platform == platform && other.status == JobStatus::InProgress)
        {
            return Err(StoreError::PlatformBusy { platform });
        }

        let job = self.job_mut(id)?;
        job.status = JobStatus::InProgress;
        // A job recovered mid-flight re-runs its lost attempt rather than
        // consuming a fresh one, keeping the attempt budget intact.
        job.attempt = (job.attempt + 1).min(job.max_attempts);
        job.attempted_at = Some(now);
        job.updated_at = now;
        let job = job.clone();

        // A dispatch consumes the platform's slot whether or not it succeeds.
        self.platforms.entry(platform).or_default().last_dispatch_at = Some(now);
        self.assert_invariants();
        Ok(job)
    }

    pub fn record_outcome(
        &mut self,
        id: JobId,
        decision: RetryDecision,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let job = self.job_mut(id)?;
        if job.status != JobStatus::InProgress {
            return Err(StoreError::InvalidState {
                id,
                status: job.status,
                operation: "record an outcome",
            });
        }
        job.updated_at = now;
        match decision {
            RetryDecision::Complete => {
                job.status = JobStatus::Succeeded;
            }
            RetryDecision::Fail { error } => {
                job.errors.push(error);
                job.status = JobStatus::Failed;
            }
            RetryDecision::Abandon { error } => {
                job.errors.push(error);
                job.status = JobStatus::Abandoned;
            }
            RetryDecision::Retry { at, error } => {
                job.errors.push(error);
                job.status = JobStatus::Retrying;
                // Retries never move earlier in time.
                job.scheduled_at = at.max(job.scheduled_at);
            }
            RetryDecision::AwaitIntervention { at, error } => {
                job.errors.push(error);
                job.status = JobStatus::Retrying;
                job.scheduled_at = at.max(job.scheduled_at);
                // Waiting on a human is not the job's fault.
                job.attempt = job.attempt.saturating_sub(1);
            }
        }
        let job = job.clone();
        if job.status.is_terminal() {
            self.finish(&job, now);
        }
        self.assert_invariants();
        Ok(job)
    }

    pub fn cancel(&mut self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = self.job_mut(id)?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Retrying) {
            return Err(StoreError::InvalidState {
                id,
                status: job.status,
                operation: "cancel",
            });
        }
        job.status = JobStatus::Cancelled;
        job.updated_at = now;
        let job = job.clone();
        self.finish(&job, now);
        self.assert_invariants();
        Ok(job)
    }

    pub fn recover(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut recovered = Vec::new();
        for job in &mut self.jobs {
            if job.status == JobStatus::InProgress {
                job.status = JobStatus::Retrying;
                job.scheduled_at = now;
                job.updated_at = now;
                recovered.push(job.id);
            }
        }
        self.assert_invariants();
        recovered
    }

    pub fn queue(&self, platform: Option<Platform>) -> Vec<Job> {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .filter(|job| platform.map_or(true, |platform| job.platform == platform))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.inserted_at.cmp(&b.inserted_at))
                .then(a.id.cmp(&b.id))
        });
        jobs
    }

    pub fn history(&self, query: HistoryQuery) -> Vec<HistoryEntry> {
        let mut entries: Vec<_> = self
            .history
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.finished_at
                .cmp(&a.finished_at)
                .then(b.job_id.cmp(&a.job_id))
        });
        entries.truncate(query.limit);
        entries
    }

    pub fn timing(&self) -> BTreeMap<Platform, PlatformTimingState> {
        self.platforms.clone()
    }

    pub fn prune_history(&mut self, spec: &RetentionSpec) -> usize {
        let before = self.history.len();
        match spec.keep {
            KeepBy::MaxAge(age) => {
                let cutoff = Utc::now() - age;
                self.history
                    .retain(|entry| !spec.matches(entry) || entry.finished_at > cutoff);
            }
            KeepBy::MaxLength(length) => {
                let matching = self.history.iter().filter(|entry| spec.matches(entry)).count();
                // History is kept in append order, so dropping from the front
                // drops the oldest entries first.
                let mut to_drop = matching.saturating_sub(length as usize);
                self.history.retain(|entry| {
                    if spec.matches(entry) && to_drop > 0 {
                        to_drop -= 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }
        before - self.history.len()
    }

    /// Moves a terminal job out of the live table and into history in the
    /// same mutation.
    fn finish(&mut self, job: &Job, now: DateTime<Utc>) {
        self.history.push(HistoryEntry::snapshot(job, now));
        self.jobs.retain(|other| other.id != job.id);
    }

    fn job(&self, id: JobId) -> Result<&Job, StoreError> {
        self.jobs
            .iter()
            .find(|job| job.id == id)
            .ok_or(StoreError::JobNotFound(id))
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, StoreError> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::JobNotFound(id))
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        use std::collections::HashSet;

        let mut ids = HashSet::new();
        for job in &self.jobs {
            debug_assert!(ids.insert(job.id), "duplicate live job id {}", job.id);
            debug_assert!(!job.status.is_terminal(), "terminal job {} in live table", job.id);
            debug_assert!(
                job.attempt <= job.max_attempts,
                "job {} exceeded its attempt budget",
                job.id
            );
        }
        for entry in &self.history {
            debug_assert!(ids.insert(entry.job_id), "job {} in both tables", entry.job_id);
            debug_assert!(entry.status.is_terminal());
        }
        for platform in Platform::ALL {
            let in_flight = self
                .jobs
                .iter()
                .filter(|job| job.platform == platform && job.status == JobStatus::InProgress)
                .count();
            debug_assert!(in_flight <= 1, "{platform} has {in_flight} jobs in flight");
        }
    }

    #[cfg(not(debug_assertions))]
    fn assert_invariants(&self) {}
}
