//! Test suite for ensuring a correct implementation of a [`JobStore`].
//!
//! Store implementors should include this as part of their test suites via
//! [`store_test_suite!`](crate::store_test_suite).

use chrono::{DateTime, TimeDelta, Utc};

use crate::history::HistoryQuery;
use crate::job::{JobStatus, UploadError};
use crate::platform::Platform;
use crate::retention::RetentionSpec;
use crate::retry::RetryDecision;
use crate::uploader::FailureKind;

use super::{JobStore, NewJob, StoreError};

/// A minimal enqueuable job for store tests.
pub fn mock_job(platform: Platform, clip: &str) -> NewJob {
    NewJob {
        platform,
        clip_path: clip.into(),
        metadata: crate::metadata::ClipMetadata::new("caption"),
        scheduled_at: Utc::now(),
        stagger_index: 0,
        max_attempts: 3,
        dedupe_key: NewJob::dedupe_key_for(platform, std::path::Path::new(clip)),
    }
}

fn transient_error(attempt: u16) -> UploadError {
    UploadError {
        attempt,
        kind: FailureKind::Transient,
        detail: "network timeout".to_owned(),
        recorded_at: Utc::now(),
    }
}

fn fatal_error(attempt: u16) -> UploadError {
    UploadError {
        attempt,
        kind: FailureKind::Fatal,
        detail: "authentication rejected".to_owned(),
        recorded_at: Utc::now(),
    }
}

fn intervention_error(attempt: u16) -> UploadError {
    UploadError {
        attempt,
        kind: FailureKind::NeedsIntervention,
        detail: "captcha challenge".to_owned(),
        recorded_at: Utc::now(),
    }
}

async fn dispatch(store: &impl JobStore, job: NewJob, now: DateTime<Utc>) -> crate::job::Job {
    let job = store.enqueue(job).await.unwrap();
    store.mark_in_progress(job.id, now).await.unwrap()
}

pub async fn enqueue_assigns_unique_ids(store: impl JobStore) {
    let first = store
        .enqueue(mock_job(Platform::Instagram, "a.mp4"))
        .await
        .unwrap();
    let second = store
        .enqueue(mock_job(Platform::Instagram, "b.mp4"))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.status, JobStatus::Queued);
    assert_eq!(first.attempt, 0);
    assert_eq!(store.queue(None).await.unwrap().len(), 2);
}

pub async fn enqueue_rejects_duplicate_live_job(store: impl JobStore) {
    let job = store
        .enqueue(mock_job(Platform::Instagram, "a.mp4"))
        .await
        .unwrap();

    let duplicate = store.enqueue(mock_job(Platform::Instagram, "a.mp4")).await;
    assert!(
        matches!(duplicate, Err(StoreError::DuplicateJob(id)) if id == job.id),
        "expected DuplicateJob({}), got {duplicate:?}",
        job.id
    );

    // Same clip to a different platform is a different publish action.
    assert!(store.enqueue(mock_job(Platform::TikTok, "a.mp4")).await.is_ok());
}

pub async fn enqueue_allows_same_clip_after_terminal(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;
    store
        .record_outcome(job.id, RetryDecision::Complete)
        .await
        .unwrap();

    assert!(store.enqueue(mock_job(Platform::Instagram, "a.mp4")).await.is_ok());
}

pub async fn enqueue_records_planned_slot(store: impl JobStore) {
    let slot = Utc::now() + TimeDelta::minutes(90);
    let mut job = mock_job(Platform::YouTube, "a.mp4");
    job.scheduled_at = slot;
    job.stagger_index = 1;
    store.enqueue(job).await.unwrap();

    let timing = store.timing().await.unwrap();
    assert_eq!(timing[&Platform::YouTube].last_planned_at, Some(slot));
    assert_eq!(timing[&Platform::YouTube].stagger_index, 1);
    assert_eq!(timing[&Platform::YouTube].last_dispatch_at, None);
}

pub async fn list_due_orders_by_schedule_then_insertion(store: impl JobStore) {
    let now = Utc::now();
    let mut late = mock_job(Platform::Instagram, "late.mp4");
    late.scheduled_at = now - TimeDelta::minutes(1);
    let mut early = mock_job(Platform::TikTok, "early.mp4");
    early.scheduled_at = now - TimeDelta::minutes(10);
    let mut tied = mock_job(Platform::YouTube, "tied.mp4");
    tied.scheduled_at = now - TimeDelta::minutes(1);

    let late = store.enqueue(late).await.unwrap();
    let early = store.enqueue(early).await.unwrap();
    let tied = store.enqueue(tied).await.unwrap();

    let due: Vec<_> = store
        .list_due(now)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    // Ties on scheduled_at go to the job enqueued first.
    assert_eq!(due, vec![early.id, late.id, tied.id]);
}

pub async fn list_due_excludes_future_and_in_progress(store: impl JobStore) {
    let now = Utc::now();
    let mut future = mock_job(Platform::Instagram, "future.mp4");
    future.scheduled_at = now + TimeDelta::hours(1);
    store.enqueue(future).await.unwrap();

    let running = dispatch(&store, mock_job(Platform::TikTok, "running.mp4"), now).await;
    assert_eq!(running.status, JobStatus::InProgress);

    assert!(store.list_due(now).await.unwrap().is_empty());
}

pub async fn mark_in_progress_starts_attempt(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.attempted_at, Some(now));

    let timing = store.timing().await.unwrap();
    assert_eq!(timing[&Platform::Instagram].last_dispatch_at, Some(now));
}

pub async fn mark_in_progress_not_found(store: impl JobStore) {
    let missing = crate::job::JobId::from(42);
    let result = store.mark_in_progress(missing, Utc::now()).await;
    assert!(matches!(result, Err(StoreError::JobNotFound(id)) if id == missing));
}

pub async fn mark_in_progress_requires_queued_or_retrying(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    let result = store.mark_in_progress(job.id, now).await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidState {
            status: JobStatus::InProgress,
            ..
        }) | Err(StoreError::PlatformBusy { .. })
    ));
}

pub async fn mark_in_progress_rejects_busy_platform(store: impl JobStore) {
    let now = Utc::now();
    dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    let queued = store
        .enqueue(mock_job(Platform::Instagram, "b.mp4"))
        .await
        .unwrap();
    let result = store.mark_in_progress(queued.id, now).await;
    assert!(matches!(
        result,
        Err(StoreError::PlatformBusy {
            platform: Platform::Instagram
        })
    ));

    // The skipped job is untouched by the rejection.
    let queue = store.queue(Some(Platform::Instagram)).await.unwrap();
    let skipped = queue.iter().find(|job| job.id == queued.id).unwrap();
    assert_eq!(skipped.status, JobStatus::Queued);
    assert_eq!(skipped.attempt, 0);
}

pub async fn mark_in_progress_allows_other_platforms(store: impl JobStore) {
    let now = Utc::now();
    dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;
    let other = dispatch(&store, mock_job(Platform::TikTok, "a.mp4"), now).await;

    assert_eq!(other.status, JobStatus::InProgress);
}

pub async fn success_moves_job_to_history(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    let finished = store
        .record_outcome(job.id, RetryDecision::Complete)
        .await
        .unwrap();
    assert_eq!(finished.status, JobStatus::Succeeded);

    assert!(store.queue(None).await.unwrap().is_empty());
    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id, job.id);
    assert_eq!(history[0].status, JobStatus::Succeeded);
    assert_eq!(history[0].attempt, 1);
}

pub async fn fatal_failure_moves_job_to_history(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    store
        .record_outcome(
            job.id,
            RetryDecision::Fail {
                error: fatal_error(1),
            },
        )
        .await
        .unwrap();

    assert!(store.queue(None).await.unwrap().is_empty());
    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history[0].status, JobStatus::Failed);
    assert_eq!(history[0].last_error().unwrap().kind, FailureKind::Fatal);
}

pub async fn transient_retry_keeps_job_queued(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    let at = now + TimeDelta::minutes(2);
    let retried = store
        .record_outcome(
            job.id,
            RetryDecision::Retry {
                at,
                error: transient_error(1),
            },
        )
        .await
        .unwrap();

    assert_eq!(retried.status, JobStatus::Retrying);
    assert_eq!(retried.scheduled_at, at);
    assert_eq!(retried.attempt, 1);
    assert_eq!(retried.errors.len(), 1);
    assert!(store.history(HistoryQuery::new()).await.unwrap().is_empty());
    assert_eq!(store.queue(None).await.unwrap().len(), 1);
}

pub async fn retry_never_moves_schedule_earlier(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;
    let original = job.scheduled_at;

    let retried = store
        .record_outcome(
            job.id,
            RetryDecision::Retry {
                at: original - TimeDelta::hours(1),
                error: transient_error(1),
            },
        )
        .await
        .unwrap();

    assert_eq!(retried.scheduled_at, original);
}

pub async fn abandon_moves_job_to_history(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    store
        .record_outcome(
            job.id,
            RetryDecision::Abandon {
                error: transient_error(1),
            },
        )
        .await
        .unwrap();

    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Abandoned);
    assert!(store.queue(None).await.unwrap().is_empty());
}

pub async fn intervention_restores_attempt(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;
    assert_eq!(job.attempt, 1);

    let at = now + TimeDelta::hours(6);
    let waiting = store
        .record_outcome(
            job.id,
            RetryDecision::AwaitIntervention {
                at,
                error: intervention_error(1),
            },
        )
        .await
        .unwrap();

    assert_eq!(waiting.status, JobStatus::Retrying);
    assert_eq!(waiting.attempt, 0);
    assert_eq!(waiting.scheduled_at, at);
    assert!(waiting.awaiting_intervention());
}

pub async fn record_outcome_requires_in_progress(store: impl JobStore) {
    let job = store
        .enqueue(mock_job(Platform::Instagram, "a.mp4"))
        .await
        .unwrap();

    let result = store.record_outcome(job.id, RetryDecision::Complete).await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidState {
            status: JobStatus::Queued,
            ..
        })
    ));
}

pub async fn cancel_queued_job_is_terminal(store: impl JobStore) {
    let job = store
        .enqueue(mock_job(Platform::Instagram, "a.mp4"))
        .await
        .unwrap();

    let cancelled = store.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    assert!(store.queue(None).await.unwrap().is_empty());
    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Cancelled);
}

pub async fn cancel_rejects_in_progress_job(store: impl JobStore) {
    let now = Utc::now();
    let job = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), now).await;

    // Already dispatched: the upload runs to completion and cannot be aborted.
    let result = store.cancel(job.id).await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidState {
            status: JobStatus::InProgress,
            ..
        })
    ));
}

pub async fn recover_resets_interrupted_jobs(store: impl JobStore) {
    let dispatched = Utc::now();
    let interrupted = dispatch(&store, mock_job(Platform::Instagram, "a.mp4"), dispatched).await;
    let untouched = store
        .enqueue(mock_job(Platform::TikTok, "b.mp4"))
        .await
        .unwrap();

    let now = Utc::now();
    let recovered = store.recover(now).await.unwrap();
    assert_eq!(recovered, vec![interrupted.id]);

    let queue = store.queue(None).await.unwrap();
    assert_eq!(queue.len(), 2);
    let job = queue.iter().find(|job| job.id == interrupted.id).unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.scheduled_at, now);
    assert_eq!(job.attempt, 1);
    let job = queue.iter().find(|job| job.id == untouched.id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    // Recovery is idempotent.
    assert!(store.recover(Utc::now()).await.unwrap().is_empty());
}

pub async fn history_returns_newest_first(store: impl JobStore) {
    let now = Utc::now();
    for (index, platform) in [Platform::Instagram, Platform::TikTok, Platform::Instagram]
        .into_iter()
        .enumerate()
    {
        let job = dispatch(&store, mock_job(platform, &format!("clip-{index}.mp4")), now).await;
        store
            .record_outcome(job.id, RetryDecision::Complete)
            .await
            .unwrap();
    }

    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].finished_at >= pair[1].finished_at));

    let instagram = store
        .history(HistoryQuery::new().for_platform(Platform::Instagram))
        .await
        .unwrap();
    assert_eq!(instagram.len(), 2);

    let limited = store
        .history(HistoryQuery::new().with_limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].job_id, history[0].job_id);

    let before = store
        .history(HistoryQuery::new().before(history[0].finished_at))
        .await
        .unwrap();
    assert!(before.iter().all(|entry| entry.finished_at < history[0].finished_at));
}

pub async fn prune_history_drops_only_matching_entries(store: impl JobStore) {
    let now = Utc::now();
    for index in 0..3 {
        let job = dispatch(
            &store,
            mock_job(Platform::Instagram, &format!("ok-{index}.mp4")),
            now,
        )
        .await;
        store
            .record_outcome(job.id, RetryDecision::Complete)
            .await
            .unwrap();
    }
    let failed = dispatch(&store, mock_job(Platform::TikTok, "bad.mp4"), now).await;
    store
        .record_outcome(
            failed.id,
            RetryDecision::Fail {
                error: fatal_error(1),
            },
        )
        .await
        .unwrap();

    let spec = RetentionSpec::max_length(1, JobStatus::Succeeded);
    let removed = store.prune_history(&spec).await.unwrap();
    assert_eq!(removed, 2);

    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 2);
    // The newest succeeded entry and the failed entry survive.
    assert!(history.iter().any(|entry| entry.status == JobStatus::Failed));
    assert!(history
        .iter()
        .any(|entry| entry.status == JobStatus::Succeeded && entry.clip_path.ends_with("ok-2.mp4")));

    let spec = RetentionSpec::max_age(TimeDelta::zero(), JobStatus::Succeeded);
    store.prune_history(&spec).await.unwrap();
    let history = store.history(HistoryQuery::new()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Failed);
}

/// Create the [`JobStore`] contract test suite for a store implementation.
///
/// # Example
///
/// ```
/// # use clipcast::store::memory::InMemoryStore;
/// use clipcast::store_test_suite;
/// store_test_suite!(for: InMemoryStore::new());
/// ```
///
/// Implementations that need per-test setup (for example a scratch
/// directory) can use the `setup:` form, which expects a `(store, guard)`
/// tuple; the guard is kept alive for the duration of the test:
///
/// ```ignore
/// store_test_suite!(setup: {
///     let dir = tempfile::tempdir().unwrap();
///     (FileStore::open(dir.path()).unwrap(), dir)
/// });
/// ```
#[macro_export]
macro_rules! store_test_suite {
    (for: $store:expr) => {
        $crate::store_test_suite!(setup: ($store, ()));
    };
    (setup: $setup:expr) => {
        $crate::store_test_suite!(@test $setup;
            enqueue_assigns_unique_ids,
            enqueue_rejects_duplicate_live_job,
            enqueue_allows_same_clip_after_terminal,
            enqueue_records_planned_slot,
            list_due_orders_by_schedule_then_insertion,
            list_due_excludes_future_and_in_progress,
            mark_in_progress_starts_attempt,
            mark_in_progress_not_found,
            mark_in_progress_requires_queued_or_retrying,
            mark_in_progress_rejects_busy_platform,
            mark_in_progress_allows_other_platforms,
            success_moves_job_to_history,
            fatal_failure_moves_job_to_history,
            transient_retry_keeps_job_queued,
            retry_never_moves_schedule_earlier,
            abandon_moves_job_to_history,
            intervention_restores_attempt,
            record_outcome_requires_in_progress,
            cancel_queued_job_is_terminal,
            cancel_rejects_in_progress_job,
            recover_resets_interrupted_jobs,
            history_returns_newest_first,
            prune_history_drops_only_matching_entries,
        );
    };
    (@test $setup:expr; $($name:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                let (store, _guard) = $setup;
                $crate::store::testing::$name(store).await;
            }
        )+
    };
}
