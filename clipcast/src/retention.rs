//! Operator-configured clean-up of old history entries.
//!
//! The scheduler itself never deletes history. When a deployment wants a
//! bound on how much terminal history it keeps, it configures a
//! [`RetentionConfig`] with a [`cron::Schedule`] saying when the clean-up
//! runs and one [`RetentionSpec`] per rule. Rules are scoped by terminal
//! status and optionally by platform, so it is possible to e.g. keep
//! succeeded uploads for a month, keep only the last 50 cancelled jobs, and
//! keep abandoned jobs indefinitely.
//!
//! # Example
//!
//! ```
//! # use clipcast::retention::{RetentionConfig, RetentionSpec};
//! # use clipcast::job::JobStatus;
//! # use clipcast::platform::Platform;
//! # use chrono::TimeDelta;
//! # use std::str::FromStr;
//! let config = RetentionConfig::new(cron::Schedule::from_str("0 0 * * * *").unwrap())
//!     .with_policy(RetentionSpec::max_age(TimeDelta::days(31), JobStatus::Succeeded))
//!     .with_policy(
//!         RetentionSpec::max_length(50, JobStatus::Cancelled).only(Platform::TikTok),
//!     );
//! ```

use chrono::TimeDelta;

use crate::history::HistoryEntry;
use crate::job::JobStatus;
use crate::platform::Platform;

pub(crate) mod runner;

/// When retention runs and which rules it applies.
pub struct RetentionConfig {
    pub(crate) schedule: cron::Schedule,
    pub(crate) max_concurrency: Option<usize>,
    pub(crate) policies: Vec<RetentionSpec>,
}

impl RetentionConfig {
    /// A retention configuration that runs on the provided cron schedule.
    pub fn new(schedule: cron::Schedule) -> Self {
        Self {
            schedule,
            max_concurrency: Some(10),
            policies: Default::default(),
        }
    }

    /// Limits how many rules are applied to the store simultaneously.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn with_policy(mut self, policy: RetentionSpec) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_policies(mut self, policies: impl IntoIterator<Item = RetentionSpec>) -> Self {
        self.policies.extend(policies);
        self
    }
}

/// A single retention rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSpec {
    /// The terminal status of the entries this rule affects.
    pub status: JobStatus,
    /// Whether to bound entries by age or by count.
    pub keep: KeepBy,
    /// The platforms this rule affects.
    pub platforms: PlatformSpec,
}

impl RetentionSpec {
    /// Removes matching entries older than `age`.
    pub const fn max_age(age: TimeDelta, status: JobStatus) -> Self {
        Self {
            status,
            keep: KeepBy::MaxAge(age),
            platforms: PlatformSpec::Except(Vec::new()),
        }
    }

    /// Keeps at most `length` matching entries, dropping the oldest first.
    pub const fn max_length(length: u32, status: JobStatus) -> Self {
        Self {
            status,
            keep: KeepBy::MaxLength(length),
            platforms: PlatformSpec::Except(Vec::new()),
        }
    }

    /// Restricts the rule to the given platform; may be called repeatedly to
    /// include more platforms.
    pub fn only(mut self, platform: Platform) -> Self {
        match &mut self.platforms {
            PlatformSpec::Only(platforms) => platforms.push(platform),
            PlatformSpec::Except(_) => self.platforms = PlatformSpec::Only(vec![platform]),
        }
        self
    }

    /// Excludes the given platform from the rule; may be called repeatedly to
    /// exclude more platforms.
    pub fn except(mut self, platform: Platform) -> Self {
        match &mut self.platforms {
            PlatformSpec::Except(platforms) => platforms.push(platform),
            PlatformSpec::Only(_) => self.platforms = PlatformSpec::Except(vec![platform]),
        }
        self
    }

    pub(crate) fn matches(&self, entry: &HistoryEntry) -> bool {
        entry.status == self.status && self.platforms.matches(entry.platform)
    }
}

/// The strategy to bound history by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepBy {
    /// Remove all matching entries older than the given [`TimeDelta`].
    MaxAge(TimeDelta),
    /// Keep at most the given number of matching entries, oldest removed
    /// first.
    MaxLength(u32),
}

/// An inclusion/exclusion specification over platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSpec {
    /// Affect all platforms except those given.
    Except(Vec<Platform>),
    /// Affect only the platforms given.
    Only(Vec<Platform>),
}

impl PlatformSpec {
    fn matches(&self, platform: Platform) -> bool {
        match self {
            PlatformSpec::Except(platforms) => !platforms.contains(&platform),
            PlatformSpec::Only(platforms) => platforms.contains(&platform),
        }
    }
}
