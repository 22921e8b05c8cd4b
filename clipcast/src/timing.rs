//! The timing policy: where a new job lands on the calendar.
//!
//! Two rules shape per-platform schedules:
//!
//! 1. **Minimum spacing**: a platform's next dispatch may not occur before
//!    `min_upload_delay` after its previous one, whether that one succeeded
//!    or failed.
//! 2. **Cross-platform stagger**: when several platforms would dispatch at
//!    overlapping times, each is pushed back by `stagger_delay` times its
//!    position in the rotation, so uploads land visibly apart rather than
//!    simultaneously.
//!
//! The policy is pure: it reads the persisted per-platform timing map and
//! returns a [`Placement`]; the store records the planned slot when the job
//! is enqueued.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::platform::Platform;

/// Per-platform dispatch bookkeeping, persisted alongside the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformTimingState {
    /// When the platform's most recent attempt was dispatched, success or
    /// failure.
    pub last_dispatch_at: Option<DateTime<Utc>>,
    /// The latest slot handed out to the platform's queue, so back-to-back
    /// enqueues space themselves without waiting for dispatches.
    pub last_planned_at: Option<DateTime<Utc>>,
    /// The platform's position in the stagger rotation at its last placement.
    pub stagger_index: u32,
}

impl PlatformTimingState {
    fn occupies(&self, slot: DateTime<Utc>, window: TimeDelta) -> bool {
        let near = |at: DateTime<Utc>| (at - slot).abs() < window;
        self.last_planned_at.is_some_and(near) || self.last_dispatch_at.is_some_and(near)
    }
}

/// A scheduling decision for one new job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scheduled_at: DateTime<Utc>,
    pub stagger_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingPolicy {
    min_upload_delay: TimeDelta,
    stagger_delay: TimeDelta,
}

impl TimingPolicy {
    pub fn new(min_upload_delay: TimeDelta, stagger_delay: TimeDelta) -> Self {
        Self {
            min_upload_delay,
            stagger_delay,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.min_upload_delay, config.stagger_delay)
    }

    /// Whether `platform` may dispatch at `now`.
    ///
    /// A retry can be scheduled closer to its failed attempt than the
    /// platform spacing allows; the scheduler checks this gate at dispatch
    /// time so consecutive dispatches still honor `min_upload_delay`.
    pub fn may_dispatch(
        &self,
        now: DateTime<Utc>,
        platform: Platform,
        states: &BTreeMap<Platform, PlatformTimingState>,
    ) -> bool {
        states
            .get(&platform)
            .and_then(|state| state.last_dispatch_at)
            .map_or(true, |last| now >= last + self.min_upload_delay)
    }

    /// Computes the effective slot for a job requested at `requested` on
    /// `platform`, given every platform's timing state.
    ///
    /// The slot is `max(requested, last dispatch + min delay, last planned
    /// slot + min delay)`, then bumped by `stagger_delay` while another
    /// platform occupies a slot within the stagger window.
    pub fn plan(
        &self,
        requested: DateTime<Utc>,
        platform: Platform,
        states: &BTreeMap<Platform, PlatformTimingState>,
    ) -> Placement {
        let mut scheduled_at = requested;
        if let Some(state) = states.get(&platform) {
            if let Some(last) = state.last_dispatch_at {
                scheduled_at = scheduled_at.max(last + self.min_upload_delay);
            }
            if let Some(planned) = state.last_planned_at {
                scheduled_at = scheduled_at.max(planned + self.min_upload_delay);
            }
        }

        let mut stagger_index = 0;
        if self.stagger_delay > TimeDelta::zero() {
            // Bounded: each bump clears at least one other platform's slot.
            while stagger_index <= states.len() as u32
                && states
                    .iter()
                    .filter(|(other, _)| **other != platform)
                    .any(|(_, state)| state.occupies(scheduled_at, self.stagger_delay))
            {
                scheduled_at = scheduled_at + self.stagger_delay;
                stagger_index += 1;
            }
        }

        Placement {
            scheduled_at,
            stagger_index,
        }
    }
}
