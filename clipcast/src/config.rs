use std::time::Duration;

use chrono::TimeDelta;

/// Configuration knobs consumed by the scheduler core.
///
/// # Example
///
/// ```
/// # use clipcast::config::SchedulerConfig;
/// # use chrono::TimeDelta;
/// # use std::time::Duration;
/// let config = SchedulerConfig::default()
///     .with_min_upload_delay(TimeDelta::minutes(30))
///     .with_max_retries(5)
///     .with_tick_interval(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Minimum spacing between two dispatches on the same platform.
    pub min_upload_delay: TimeDelta,
    /// Offset applied between platforms whose uploads would otherwise land
    /// simultaneously.
    pub stagger_delay: TimeDelta,
    /// Total dispatch attempts a job gets before it is abandoned.
    pub max_retries: u16,
    /// First retry delay after a transient failure; doubles with each
    /// further failure.
    pub base_retry_delay: TimeDelta,
    /// Fixed delay before re-attempting a job blocked on manual intervention.
    pub intervention_delay: TimeDelta,
    /// How often the control loop looks for due jobs. Independent of the
    /// upload delays above.
    pub tick_interval: Duration,
    /// Abort an upload attempt that runs longer than this; the attempt is
    /// treated as a transient failure.
    pub upload_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_upload_delay: TimeDelta::minutes(60),
            stagger_delay: TimeDelta::minutes(5),
            max_retries: 3,
            base_retry_delay: TimeDelta::minutes(15),
            intervention_delay: TimeDelta::hours(6),
            tick_interval: Duration::from_secs(30),
            upload_timeout: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_min_upload_delay(mut self, delay: TimeDelta) -> Self {
        self.min_upload_delay = delay;
        self
    }

    pub fn with_stagger_delay(mut self, delay: TimeDelta) -> Self {
        self.stagger_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u16) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: TimeDelta) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_intervention_delay(mut self, delay: TimeDelta) -> Self {
        self.intervention_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upload_timeout = timeout;
        self
    }
}
