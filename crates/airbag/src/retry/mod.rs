// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry decisions: classification, attempt budget and backoff.
//!
//! [`RetryPolicy::should_retry`] answers one question after a failed attempt: try again, and
//! after how long? The answer depends on three things, checked in this order:
//!
//! 1. The error classification. Non-retryable errors never retry.
//! 2. The attempt budget (`max_attempts`, counting the first try).
//! 3. The remaining time of the request. A retry whose wait would reach the deadline is not
//!    scheduled.
//!
//! The delay before retry `n` (0-based index of the failed attempt) is
//! `min(base_delay * 2^n, max_delay)` plus uniform jitter of at most half that delay. The jitter
//! is drawn from `[0, delay / 2)`; the upper bound itself is never produced. When the
//! [`RecoveryInfo`][crate::RecoveryInfo] of the error carries a delay, the policy waits at
//! least that long.

mod attempt;
mod backoff;
pub(crate) mod constants;

use std::time::Duration;

pub use attempt::Attempt;
use constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_USE_JITTER};

use crate::Classify;
use crate::classify::is_retryable;
use crate::rnd::Rnd;

/// Decides whether and when a failed attempt is retried.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::ErrorKind;
/// use airbag::retry::{Attempt, RetryDecision, RetryPolicy};
///
/// let policy = RetryPolicy::new()
///     .max_attempts(3)
///     .base_delay(Duration::from_millis(100))
///     .jitter(false);
///
/// let first = Attempt::first(policy.get_max_attempts());
///
/// match policy.should_retry(first, &ErrorKind::Unavailable, None) {
///     RetryDecision::Retry { delay, next } => {
///         assert_eq!(delay, Duration::from_millis(100));
///         assert_eq!(next.index(), 1);
///     }
///     RetryDecision::Stop(reason) => unreachable!("unexpected stop: {reason:?}"),
///     other => unreachable!("unexpected decision: {other:?}"),
/// }
///
/// // Validation errors are never retried.
/// assert!(matches!(
///     policy.should_retry(first, &ErrorKind::Validation, None),
///     RetryDecision::Stop(_)
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    use_jitter: bool,
    rnd: Rnd,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RetryDecision {
    /// Wait for `delay`, then make attempt `next`.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// The attempt to make after the delay.
        next: Attempt,
    },

    /// Give up and report the current failure.
    Stop(StopReason),
}

/// Why [`RetryPolicy`] stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StopReason {
    /// The error is not retryable.
    NonRetryable,

    /// The attempt budget is used up.
    Exhausted,

    /// Waiting for the next attempt would cross the request deadline.
    DeadlineWouldExceed,
}

impl StopReason {
    /// Returns a short, stable `snake_case` name of the reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable",
            Self::Exhausted => "exhausted",
            Self::DeadlineWouldExceed => "deadline_would_exceed",
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Creates a policy with the default settings: 3 attempts, 100 ms base delay, 10 s maximum
    /// delay, jitter enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            use_jitter: DEFAULT_USE_JITTER,
            rnd: Rnd::default(),
        }
    }

    /// Sets the attempt budget, including the first try. Values below 1 are treated as 1.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the cap of the exponential delay. Jitter and recovery delay hints may exceed it.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }

    /// Returns the attempt budget.
    #[must_use]
    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn get_base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn get_max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns `true` if jitter is enabled.
    #[must_use]
    pub fn has_jitter(&self) -> bool {
        self.use_jitter
    }

    /// Decides what to do after `attempt` failed with `error`.
    ///
    /// `remaining` is the time left until the request deadline, or `None` when the request is
    /// unbounded.
    pub fn should_retry<E>(&self, attempt: Attempt, error: &E, remaining: Option<Duration>) -> RetryDecision
    where
        E: Classify + ?Sized,
    {
        let recovery = error.recovery_info();

        if !is_retryable(&recovery) {
            return RetryDecision::Stop(StopReason::NonRetryable);
        }

        let Some(next) = attempt.next(self.max_attempts) else {
            return RetryDecision::Stop(StopReason::Exhausted);
        };

        let delay = self.delay(attempt);
        let delay = recovery.get_delay().map_or(delay, |hint| delay.max(hint));

        if remaining.is_some_and(|remaining| delay >= remaining) {
            return RetryDecision::Stop(StopReason::DeadlineWouldExceed);
        }

        RetryDecision::Retry { delay, next }
    }

    /// Returns the backoff delay after `attempt` failed, jitter included.
    #[must_use]
    pub fn delay(&self, attempt: Attempt) -> Duration {
        let delay = backoff::exponential(self.base_delay, attempt.index(), self.max_delay);

        if self.use_jitter {
            backoff::add_jitter(delay, &self.rnd)
        } else {
            delay
        }
    }

    #[cfg(test)]
    pub(crate) fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }
}
