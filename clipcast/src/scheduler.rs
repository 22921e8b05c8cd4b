//! The control loop: selects due jobs, dispatches them through the platform
//! uploaders, and feeds outcomes back into the store.
//!
//! The loop is the single writer of scheduler state. Uploads themselves run
//! on spawned tasks (they may take minutes) and report their outcome over a
//! channel; the loop serializes all store mutation, so no further locking
//! discipline is needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::config::SchedulerConfig;
use crate::credentials::{CredentialError, CredentialProvider};
use crate::job::{Job, JobId};
use crate::platform::Platform;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{JobStore, StoreError};
use crate::timing::TimingPolicy;
use crate::uploader::{Uploader, UploaderRegistry, UploadOutcome};

pub(crate) struct OutcomeReport {
    id: JobId,
    platform: Platform,
    attempt: u16,
    max_attempts: u16,
    outcome: UploadOutcome,
}

pub(crate) struct SchedulerLoop<S> {
    store: S,
    credentials: Arc<dyn CredentialProvider>,
    uploaders: UploaderRegistry,
    config: SchedulerConfig,
    retry: RetryPolicy,
    timing: TimingPolicy,
    in_flight: HashSet<Platform>,
    outcome_tx: mpsc::UnboundedSender<OutcomeReport>,
}

impl<S> SchedulerLoop<S>
where
    S: JobStore + Send + Sync + 'static,
{
    pub(crate) fn new(
        store: S,
        credentials: Arc<dyn CredentialProvider>,
        uploaders: UploaderRegistry,
        config: SchedulerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<OutcomeReport>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy::from_config(&config);
        let timing = TimingPolicy::from_config(&config);
        (
            Self {
                store,
                credentials,
                uploaders,
                config,
                retry,
                timing,
                in_flight: HashSet::new(),
                outcome_tx,
            },
            outcome_rx,
        )
    }

    pub(crate) async fn run(
        mut self,
        mut outcome_rx: mpsc::UnboundedReceiver<OutcomeReport>,
        token: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.dispatch_due().await,
                Some(report) = outcome_rx.recv() => self.record(report).await,
            }
        }
        // Stop dispatching but let running uploads finish and get recorded:
        // an upload cannot be aborted mid-flight.
        while !self.in_flight.is_empty() {
            match outcome_rx.recv().await {
                Some(report) => self.record(report).await,
                None => break,
            }
        }
        tracing::debug!("Shutting down upload scheduler loop");
    }

    async fn dispatch_due(&mut self) {
        let now = Utc::now();
        let due = match self.store.list_due(now).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(?err, "Failed to list due jobs: {err}");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        let timing = match self.store.timing().await {
            Ok(timing) => timing,
            Err(err) => {
                tracing::error!(?err, "Failed to read platform timing state: {err}");
                return;
            }
        };
        for job in due {
            if self.in_flight.contains(&job.platform) {
                // Normal backpressure: the job stays queued for a later tick.
                continue;
            }
            // A retry can come due sooner than the platform spacing allows;
            // it waits for the slot without being an error.
            if !self.timing.may_dispatch(now, job.platform, &timing) {
                continue;
            }
            let Some(uploader) = self.uploaders.get(job.platform) else {
                tracing::warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    "No uploader registered for {}, leaving job queued",
                    job.platform
                );
                continue;
            };
            let job = match self.store.mark_in_progress(job.id, Utc::now()).await {
                Ok(job) => job,
                Err(StoreError::PlatformBusy { .. } | StoreError::InvalidState { .. }) => continue,
                Err(err) => {
                    tracing::error!(?err, job_id = %job.id, "Failed to dispatch job {}: {err}", job.id);
                    continue;
                }
            };
            self.in_flight.insert(job.platform);
            self.spawn_upload(job, uploader);
        }
    }

    fn spawn_upload(&self, job: Job, uploader: Arc<dyn Uploader>) {
        let credentials = Arc::clone(&self.credentials);
        let sender = self.outcome_tx.clone();
        let timeout = self.config.upload_timeout;
        tokio::spawn(async move {
            let report = OutcomeReport {
                id: job.id,
                platform: job.platform,
                attempt: job.attempt,
                max_attempts: job.max_attempts,
                outcome: execute_upload(uploader, credentials, job, timeout).await,
            };
            let _ = sender.send(report);
        });
    }

    async fn record(&mut self, report: OutcomeReport) {
        self.in_flight.remove(&report.platform);
        let decision = self
            .retry
            .decide(report.outcome, report.attempt, report.max_attempts, Utc::now());
        match &decision {
            RetryDecision::Complete => {
                tracing::info!(job_id = %report.id, "Upload complete")
            }
            RetryDecision::Retry { at, error } => tracing::warn!(
                job_id = %report.id,
                "Upload failed and will be retried at {at}: {}",
                error.detail
            ),
            RetryDecision::AwaitIntervention { at, error } => tracing::warn!(
                job_id = %report.id,
                "Upload blocked on manual intervention, retrying at {at}: {}",
                error.detail
            ),
            RetryDecision::Fail { error } => tracing::error!(
                job_id = %report.id,
                "Upload failed permanently: {}",
                error.detail
            ),
            RetryDecision::Abandon { error } => tracing::error!(
                job_id = %report.id,
                "Upload abandoned after {} attempts: {}",
                report.attempt,
                error.detail
            ),
        }
        let _ = self
            .store
            .record_outcome(report.id, decision)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    ?err,
                    job_id = %report.id,
                    "Failed to record outcome for job {}: {err}",
                    report.id
                )
            });
    }
}

#[instrument(skip_all, fields(job_id = %job.id, platform = %job.platform))]
async fn execute_upload(
    uploader: Arc<dyn Uploader>,
    credentials: Arc<dyn CredentialProvider>,
    job: Job,
    timeout: Option<Duration>,
) -> UploadOutcome {
    let credentials = match credentials.resolve(job.platform).await {
        Ok(credentials) => credentials,
        // A platform without credentials rejects every attempt the same way.
        Err(err @ CredentialError::NotConfigured(_)) => {
            return UploadOutcome::fatal(err.to_string())
        }
    };
    tracing::debug!("Uploading {} to {}", job.clip_path.display(), job.platform);
    let mut handle = tokio::spawn(
        async move {
            uploader
                .upload(&job.clip_path, &job.metadata, &credentials)
                .await
        }
        .in_current_span(),
    );
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(result) => result,
            Err(_elapsed) => {
                handle.abort();
                return UploadOutcome::transient(format!(
                    "upload did not complete within {limit:?}"
                ));
            }
        },
        None => (&mut handle).await,
    };
    match result {
        Ok(outcome) => outcome,
        // The uploader panicked; treat it like any other transient failure.
        Err(error) => UploadOutcome::transient(panic_message(error)),
    }
}

fn panic_message(error: JoinError) -> String {
    let msg = error.to_string();
    match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or(msg),
        Err(_) => msg,
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeDelta;

    use crate::credentials::{Credentials, StaticCredentialProvider};
    use crate::history::HistoryQuery;
    use crate::job::builder::JobBuilder;
    use crate::job::JobStatus;
    use crate::store::memory::InMemoryStore;
    use crate::uploader::{FailureKind, MockUploader};
    use crate::Clipcast;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_tick_interval(Duration::from_millis(10))
            .with_min_upload_delay(TimeDelta::zero())
            .with_stagger_delay(TimeDelta::zero())
            .with_base_retry_delay(TimeDelta::zero())
    }

    fn credentials_for_all() -> StaticCredentialProvider {
        Platform::ALL
            .into_iter()
            .fold(StaticCredentialProvider::new(), |provider, platform| {
                provider.with(platform, Credentials::new("creator", "hunter2"))
            })
    }

    async fn wait_for_history(store: &InMemoryStore, count: usize) -> Vec<crate::history::HistoryEntry> {
        tokio::time::timeout(WAIT, async {
            loop {
                let history = store.history(HistoryQuery::new()).await.unwrap();
                if history.len() >= count {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history did not reach the expected size in time")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispatches_due_job_and_records_success() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .once()
            .returning(|_, _, _| UploadOutcome::Success);

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::Instagram, "clip.mp4")
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Succeeded);
        assert_eq!(history[0].attempt, 1);
        assert!(store.queue(None).await.unwrap().is_empty());

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transient_failures_retry_until_abandoned() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .times(2)
            .returning(|_, _, _| UploadOutcome::transient("rate limited"));

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::TikTok, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::TikTok, "clip.mp4")
            .with_max_attempts(2)
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Abandoned);
        assert_eq!(history[0].attempt, 2);
        assert_eq!(history[0].errors.len(), 2);
        assert!(history[0]
            .errors
            .iter()
            .all(|error| error.kind == FailureKind::Transient));

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_failure_is_never_retried() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .once()
            .returning(|_, _, _| UploadOutcome::fatal("content rejected"));

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::YouTube, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::YouTube, "clip.mp4")
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Failed);
        assert_eq!(history[0].attempt, 1);

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn missing_credentials_fail_the_job() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader.expect_upload().never();

        let handle = Clipcast::new(store.clone(), StaticCredentialProvider::new())
            .with_config(fast_config())
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::Instagram, "clip.mp4")
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Failed);
        assert_eq!(
            history[0].last_error().unwrap().kind,
            FailureKind::Fatal
        );

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_one_upload_per_platform_at_a_time() {
        let store = InMemoryStore::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut uploader = MockUploader::new();
        uploader.expect_upload().times(3).returning({
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |_, _, _| {
                let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                UploadOutcome::Success
            }
        });

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        for index in 0..3 {
            JobBuilder::new(Platform::Instagram, format!("clip-{index}.mp4"))
                .enqueue_to(&store, &fast_config())
                .await
                .unwrap();
        }

        wait_for_history(&store, 3).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn consecutive_dispatches_honor_min_upload_delay() {
        let store = InMemoryStore::new();
        let dispatched_at = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut uploader = MockUploader::new();
        uploader.expect_upload().times(2).returning({
            let dispatched_at = Arc::clone(&dispatched_at);
            move |_, _, _| {
                dispatched_at.lock().unwrap().push(std::time::Instant::now());
                UploadOutcome::Success
            }
        });

        let min_delay = TimeDelta::milliseconds(150);
        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config().with_min_upload_delay(min_delay))
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        // Enqueue directly so both jobs are due immediately and only the
        // dispatch-time gate spaces them.
        let now = Utc::now();
        for clip in ["a.mp4", "b.mp4"] {
            let mut job = crate::store::testing::mock_job(Platform::Instagram, clip);
            job.scheduled_at = now;
            store.enqueue(job).await.unwrap();
        }

        wait_for_history(&store, 2).await;
        let dispatched_at = dispatched_at.lock().unwrap();
        let gap = dispatched_at[1] - dispatched_at[0];
        assert!(
            gap >= Duration::from_millis(140),
            "dispatches only {gap:?} apart"
        );

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_uploader_counts_as_transient_failure() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .once()
            .returning(|_, _, _| panic!("browser session lost"));

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::Instagram, "clip.mp4")
            .with_max_attempts(1)
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Abandoned);
        let error = history[0].last_error().unwrap();
        assert_eq!(error.kind, FailureKind::Transient);
        assert!(error.detail.contains("browser session lost"));

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn upload_timeout_is_a_transient_failure() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader.expect_upload().once().returning(|_, _, _| {
            std::thread::sleep(Duration::from_millis(300));
            UploadOutcome::Success
        });

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config().with_upload_timeout(Some(Duration::from_millis(20))))
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::Instagram, "clip.mp4")
            .with_max_attempts(1)
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        let history = wait_for_history(&store, 1).await;
        assert_eq!(history[0].status, JobStatus::Abandoned);
        assert!(history[0]
            .last_error()
            .unwrap()
            .detail
            .contains("did not complete"));

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn job_without_registered_uploader_stays_queued() {
        let store = InMemoryStore::new();

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .spawn()
            .await
            .unwrap();

        let job = JobBuilder::new(Platform::Instagram, "clip.mp4")
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let queue = store.queue(None).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, job.id);
        assert_eq!(queue[0].status, JobStatus::Queued);
        assert_eq!(queue[0].attempt, 0);

        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn graceful_shutdown_drains_in_flight_uploads() {
        let store = InMemoryStore::new();
        let mut uploader = MockUploader::new();
        uploader.expect_upload().once().returning(|_, _, _| {
            std::thread::sleep(Duration::from_millis(100));
            UploadOutcome::Success
        });

        let handle = Clipcast::new(store.clone(), credentials_for_all())
            .with_config(fast_config())
            .with_uploader(Platform::Instagram, uploader)
            .spawn()
            .await
            .unwrap();

        JobBuilder::new(Platform::Instagram, "clip.mp4")
            .enqueue_to(&store, &fast_config())
            .await
            .unwrap();

        // Give the loop a moment to dispatch, then shut down mid-upload.
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.graceful_shutdown().await.unwrap();

        let history = store.history(HistoryQuery::new()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Succeeded);
    }
}
