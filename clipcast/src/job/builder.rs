use chrono::{DateTime, TimeDelta, Utc};

use crate::config::SchedulerConfig;
use crate::metadata::ClipMetadata;
use crate::platform::Platform;
use crate::store::{JobStore, NewJob};
use crate::timing::TimingPolicy;
use crate::ClipcastError;

use super::Job;

/// Builds and enqueues one publish job.
///
/// The effective slot is computed by the timing policy from the platform's
/// persisted timing state: the requested time is only a lower bound.
///
/// # Example
///
/// ```no_run
/// # use clipcast::job::builder::JobBuilder;
/// # use clipcast::config::SchedulerConfig;
/// # use clipcast::platform::Platform;
/// # use clipcast::store::memory::InMemoryStore;
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let config = SchedulerConfig::default();
///
/// let job = JobBuilder::new(Platform::Instagram, "clips/intro.mp4")
///     .with_caption("The moment it all clicked")
///     .with_hashtags(vec!["shorts", "viral"])
///     .enqueue_to(&store, &config)
///     .await
///     .unwrap();
/// println!("queued as {} at {}", job.id, job.scheduled_at);
/// # });
/// ```
pub struct JobBuilder {
    platform: Platform,
    clip_path: std::path::PathBuf,
    metadata: ClipMetadata,
    requested_at: DateTime<Utc>,
    max_attempts: Option<u16>,
}

impl JobBuilder {
    pub fn new(platform: Platform, clip_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            platform,
            clip_path: clip_path.into(),
            metadata: ClipMetadata::default(),
            requested_at: Utc::now(),
            max_attempts: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.metadata.caption = caption.into();
        self
    }

    pub fn with_hashtags(self, hashtags: Vec<impl Into<String>>) -> Self {
        Self {
            metadata: self.metadata.with_hashtags(hashtags),
            ..self
        }
    }

    pub fn with_metadata(self, metadata: ClipMetadata) -> Self {
        Self { metadata, ..self }
    }

    /// Overrides the configured total attempt budget for this job.
    pub fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..self
        }
    }

    /// The earliest time the caller wants the upload dispatched.
    pub fn request_at(self, requested_at: DateTime<Utc>) -> Self {
        Self {
            requested_at,
            ..self
        }
    }

    pub fn request_in(self, delay: TimeDelta) -> Self {
        Self {
            requested_at: Utc::now() + delay,
            ..self
        }
    }

    /// Plans the job's slot against the store's timing state and persists it.
    pub async fn enqueue_to<S: JobStore>(
        self,
        store: &S,
        config: &SchedulerConfig,
    ) -> Result<Job, ClipcastError> {
        let states = store.timing().await?;
        let placement =
            TimingPolicy::from_config(config).plan(self.requested_at, self.platform, &states);
        let dedupe_key = NewJob::dedupe_key_for(self.platform, &self.clip_path);
        let job = store
            .enqueue(NewJob {
                platform: self.platform,
                clip_path: self.clip_path,
                metadata: self.metadata,
                scheduled_at: placement.scheduled_at,
                stagger_index: placement.stagger_index,
                max_attempts: self.max_attempts.unwrap_or(config.max_retries),
                dedupe_key,
            })
            .await?;
        tracing::debug!(
            job_id = %job.id,
            platform = %job.platform,
            "Queued upload for {}",
            job.scheduled_at
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use crate::store::memory::InMemoryStore;

    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_min_upload_delay(TimeDelta::minutes(60))
            .with_stagger_delay(TimeDelta::minutes(5))
    }

    #[tokio::test]
    async fn three_jobs_for_one_platform_space_an_hour_apart() {
        let store = InMemoryStore::new();
        let config = config();
        let t0 = Utc::now();

        let mut slots = Vec::new();
        for index in 0..3 {
            let job = JobBuilder::new(Platform::Instagram, format!("clip-{index}.mp4"))
                .request_at(t0)
                .enqueue_to(&store, &config)
                .await
                .unwrap();
            slots.push(job.scheduled_at);
        }

        assert_eq!(slots[0], t0);
        assert_eq!(slots[1], t0 + TimeDelta::minutes(60));
        assert_eq!(slots[2], t0 + TimeDelta::minutes(120));
    }

    #[tokio::test]
    async fn two_platforms_at_the_same_time_are_staggered() {
        let store = InMemoryStore::new();
        let config = config();
        let t0 = Utc::now();

        let first = JobBuilder::new(Platform::Instagram, "a.mp4")
            .request_at(t0)
            .enqueue_to(&store, &config)
            .await
            .unwrap();
        let second = JobBuilder::new(Platform::YouTube, "a.mp4")
            .request_at(t0)
            .enqueue_to(&store, &config)
            .await
            .unwrap();

        assert_eq!(first.scheduled_at, t0);
        assert_eq!(second.scheduled_at, t0 + TimeDelta::minutes(5));
    }

    #[tokio::test]
    async fn max_attempts_defaults_from_config() {
        let store = InMemoryStore::new();
        let config = config().with_max_retries(7);

        let defaulted = JobBuilder::new(Platform::TikTok, "a.mp4")
            .enqueue_to(&store, &config)
            .await
            .unwrap();
        assert_eq!(defaulted.max_attempts, 7);

        let overridden = JobBuilder::new(Platform::TikTok, "b.mp4")
            .with_max_attempts(1)
            .enqueue_to(&store, &config)
            .await
            .unwrap();
        assert_eq!(overridden.max_attempts, 1);
    }
}
