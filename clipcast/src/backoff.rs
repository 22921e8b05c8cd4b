//! Backoff strategies for spacing retry attempts.
//!
//! The retry policy uses a doubling [`Exponential`] strategy by default; a
//! [`Constant`] strategy backs the fixed intervention delay. Either can be
//! modified with a maximum, a minimum, or random jitter.
//!
//! All of the constructors and configuration functions are `const`.
//!
//! # Example
//!
//! ```
//! # use clipcast::backoff::{BackoffStrategy, Jitter};
//! # use chrono::TimeDelta;
//! let strategy = BackoffStrategy::exponential(TimeDelta::minutes(2))
//!     .with_max(TimeDelta::hours(1));
//!
//! assert_eq!(strategy.backoff(1), TimeDelta::minutes(2));
//! assert_eq!(strategy.backoff(2), TimeDelta::minutes(4));
//! assert_eq!(strategy.backoff(3), TimeDelta::minutes(8));
//! assert_eq!(strategy.backoff(10), TimeDelta::hours(1));
//! ```

use chrono::TimeDelta;
use rand::Rng;

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given the number of the attempt that just failed, returns the
    /// [`TimeDelta`] to wait before the next attempt.
    fn backoff(&self, attempt: u16) -> TimeDelta;
}

/// Constant backoff strategy.
///
/// Always returns the same value no matter what the attempt is.
///
/// __Note:__ This type cannot be constructed directly, instead
/// [`BackoffStrategy::constant`] should be used.
///
/// # Example
///
/// ```
/// # use clipcast::backoff::BackoffStrategy;
/// # use chrono::TimeDelta;
/// let strategy = BackoffStrategy::constant(TimeDelta::hours(6));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::hours(6));
/// assert_eq!(strategy.backoff(5), TimeDelta::hours(6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    delay: TimeDelta,
}

impl Strategy for Constant {
    fn backoff(&self, _attempt: u16) -> TimeDelta {
        self.delay
    }
}

/// Doubling exponential backoff strategy.
///
/// The delay after attempt `n` is `base * 2^(n - 1)`: the first retry waits
/// the base delay, the second twice that, and so on. It is advisable to cap
/// the growth using [`BackoffStrategy::with_max`].
///
/// __Note:__ This type cannot be constructed directly, instead
/// [`BackoffStrategy::exponential`] should be used.
///
/// # Example
///
/// ```
/// # use clipcast::backoff::BackoffStrategy;
/// # use chrono::TimeDelta;
/// let strategy =
///     BackoffStrategy::exponential(TimeDelta::seconds(2)).with_max(TimeDelta::seconds(30));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
/// assert_eq!(strategy.backoff(2), TimeDelta::seconds(4));
/// assert_eq!(strategy.backoff(3), TimeDelta::seconds(8));
/// assert_eq!(strategy.backoff(4), TimeDelta::seconds(16));
/// assert_eq!(strategy.backoff(5), TimeDelta::seconds(30));
/// assert_eq!(strategy.backoff(6), TimeDelta::seconds(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    base: TimeDelta,
    max: Option<TimeDelta>,
}

impl Strategy for Exponential {
    fn backoff(&self, attempt: u16) -> TimeDelta {
        let exponent = u32::from(attempt.saturating_sub(1));
        let factor = 1i64.checked_shl(exponent).unwrap_or(i64::MAX);
        let mut milliseconds = self.base.num_milliseconds().saturating_mul(factor);
        if let Some(max) = self.max {
            milliseconds = milliseconds.min(max.num_milliseconds());
        }
        TimeDelta::milliseconds(milliseconds)
    }
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter added to the backoff in the range
    /// `-delta <= jitter <= delta`.
    Absolute(TimeDelta),
    /// A random jitter added as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        };
        let jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value + TimeDelta::milliseconds(jitter)
    }
}

/// A backoff strategy together with its optional jitter and minimum.
///
/// # Example
///
/// ```
/// # use clipcast::backoff::{BackoffStrategy, Jitter};
/// # use chrono::TimeDelta;
/// let strategy = BackoffStrategy::exponential(TimeDelta::seconds(20))
///     .with_max(TimeDelta::seconds(60))
///     .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)));
///
/// assert!(strategy.backoff(1) >= TimeDelta::seconds(10));
/// assert!(strategy.backoff(1) <= TimeDelta::seconds(30));
/// assert!(strategy.backoff(2) >= TimeDelta::seconds(30));
/// // Note the max here is the max plus max jitter
/// assert!(strategy.backoff(10) <= TimeDelta::seconds(70));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy<T: Strategy> {
    strategy: T,
    jitter: Option<Jitter>,
    min: TimeDelta,
}

impl BackoffStrategy<Constant> {
    /// Creates a [`BackoffStrategy`] that always waits the same delay.
    pub const fn constant(delay: TimeDelta) -> Self {
        Self {
            strategy: Constant { delay },
            jitter: None,
            min: TimeDelta::zero(),
        }
    }
}

impl BackoffStrategy<Exponential> {
    /// Creates a [`BackoffStrategy`] that doubles the base delay with each
    /// failed attempt.
    pub const fn exponential(base: TimeDelta) -> Self {
        Self {
            strategy: Exponential { base, max: None },
            jitter: None,
            min: TimeDelta::zero(),
        }
    }

    /// Caps the backoff at the given maximum.
    pub const fn with_max(mut self, max: TimeDelta) -> Self {
        self.strategy.max = Some(max);
        self
    }
}

impl<T> BackoffStrategy<T>
where
    T: Strategy,
{
    /// Applies the given jitter to every computed backoff.
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Never returns a backoff below the given minimum (before jitter this
    /// also bounds the jittered result from going negative).
    pub const fn with_min(mut self, min: TimeDelta) -> Self {
        self.min = min;
        self
    }

    /// The delay to wait after the given failed attempt number.
    pub fn backoff(&self, attempt: u16) -> TimeDelta {
        let backoff = self.strategy.backoff(attempt);
        let backoff = match self.jitter {
            Some(jitter) => jitter.apply_jitter(backoff),
            None => backoff,
        };
        backoff.max(self.min)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exponential_doubles_from_base() {
        let strategy = BackoffStrategy::exponential(TimeDelta::minutes(15));

        assert_eq!(strategy.backoff(1), TimeDelta::minutes(15));
        assert_eq!(strategy.backoff(2), TimeDelta::minutes(30));
        assert_eq!(strategy.backoff(3), TimeDelta::minutes(60));
        assert_eq!(strategy.backoff(4), TimeDelta::minutes(120));
    }

    #[test]
    fn exponential_does_not_overflow_for_large_attempts() {
        let strategy = BackoffStrategy::exponential(TimeDelta::minutes(15));
        assert!(strategy.backoff(u16::MAX) > TimeDelta::zero());
    }

    #[test]
    fn min_applies_after_jitter() {
        let strategy = BackoffStrategy::constant(TimeDelta::seconds(1))
            .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)))
            .with_min(TimeDelta::zero());

        for _ in 0..100 {
            assert!(strategy.backoff(1) >= TimeDelta::zero());
        }
    }
}
