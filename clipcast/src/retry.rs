//! The retry policy: classifies an upload outcome and decides what happens to
//! the job next.
//!
//! The policy is a pure function of the outcome, the attempt number, and the
//! clock; all state changes happen in the store when the decision is applied.

use chrono::{DateTime, TimeDelta, Utc};

use crate::backoff::{BackoffStrategy, Exponential};
use crate::config::SchedulerConfig;
use crate::job::UploadError;
use crate::uploader::{FailureKind, UploadOutcome};

/// What the store should do with a job after an attempt finished.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Terminal success.
    Complete,
    /// Transient failure with attempts remaining: try again at `at`.
    Retry {
        at: DateTime<Utc>,
        error: UploadError,
    },
    /// Blocked on a human: try again at `at` without consuming the attempt.
    AwaitIntervention {
        at: DateTime<Utc>,
        error: UploadError,
    },
    /// Terminal failure, retrying would repeat the same rejection.
    Fail { error: UploadError },
    /// Terminal failure after exhausting all attempts.
    Abandon { error: UploadError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    backoff: BackoffStrategy<Exponential>,
    intervention_delay: TimeDelta,
}

impl RetryPolicy {
    pub fn new(base_retry_delay: TimeDelta, intervention_delay: TimeDelta) -> Self {
        Self {
            backoff: BackoffStrategy::exponential(base_retry_delay),
            intervention_delay,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.base_retry_delay, config.intervention_delay)
    }

    /// Decides the fate of a job whose attempt number `attempt` just finished
    /// with `outcome`.
    ///
    /// `attempt` counts the attempt that produced the outcome: the first
    /// transient failure waits the base delay, the second twice that, and so
    /// on, until `attempt == max_attempts` abandons the job.
    pub fn decide(
        &self,
        outcome: UploadOutcome,
        attempt: u16,
        max_attempts: u16,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let failure = match outcome {
            UploadOutcome::Success => return RetryDecision::Complete,
            UploadOutcome::Failure(failure) => failure,
        };
        let error = UploadError {
            attempt,
            kind: failure.kind,
            detail: failure.detail,
            recorded_at: now,
        };
        match failure.kind {
            FailureKind::Fatal => RetryDecision::Fail { error },
            FailureKind::Transient if attempt < max_attempts => RetryDecision::Retry {
                at: now + self.backoff.backoff(attempt),
                error,
            },
            FailureKind::Transient => RetryDecision::Abandon { error },
            FailureKind::NeedsIntervention => RetryDecision::AwaitIntervention {
                at: now + self.intervention_delay,
                error,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(TimeDelta::minutes(2), TimeDelta::hours(6))
    }

    #[test]
    fn success_completes() {
        let decision = policy().decide(UploadOutcome::Success, 1, 3, Utc::now());
        assert_eq!(decision, RetryDecision::Complete);
    }

    #[test]
    fn fatal_fails_regardless_of_remaining_attempts() {
        let decision = policy().decide(UploadOutcome::fatal("login rejected"), 1, 3, Utc::now());
        assert_matches!(decision, RetryDecision::Fail { error } => {
            assert_eq!(error.kind, FailureKind::Fatal);
            assert_eq!(error.attempt, 1);
        });
    }

    #[test]
    fn transient_backs_off_exponentially() {
        let now = Utc::now();
        let policy = policy();

        let first = policy.decide(UploadOutcome::transient("timeout"), 1, 3, now);
        assert_matches!(first, RetryDecision::Retry { at, .. } => {
            assert_eq!(at, now + TimeDelta::minutes(2));
        });

        let second = policy.decide(UploadOutcome::transient("timeout"), 2, 3, now);
        assert_matches!(second, RetryDecision::Retry { at, .. } => {
            assert_eq!(at, now + TimeDelta::minutes(4));
        });
    }

    #[test]
    fn transient_on_final_attempt_abandons() {
        let decision = policy().decide(UploadOutcome::transient("timeout"), 3, 3, Utc::now());
        assert_matches!(decision, RetryDecision::Abandon { error } => {
            assert_eq!(error.kind, FailureKind::Transient);
        });
    }

    #[test]
    fn intervention_waits_fixed_delay_even_on_final_attempt() {
        let now = Utc::now();
        let decision = policy().decide(UploadOutcome::needs_intervention("captcha"), 3, 3, now);
        assert_matches!(decision, RetryDecision::AwaitIntervention { at, error } => {
            assert_eq!(at, now + TimeDelta::hours(6));
            assert_eq!(error.kind, FailureKind::NeedsIntervention);
        });
    }
}
