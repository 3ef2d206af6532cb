// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use crate::ConfigError;
use crate::breaker::BreakerOptions;
use crate::breaker::constants::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_HALF_OPEN_TRIALS, DEFAULT_OPEN_DURATION};
use crate::bulkhead::{Bulkhead, DEFAULT_MAX_CONCURRENT};
use crate::retry::RetryPolicy;
use crate::retry::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_USE_JITTER};

/// Resilience settings of one dependency.
///
/// | Setting                       | Default | Meaning                                                   |
/// |-------------------------------|---------|-----------------------------------------------------------|
/// | `failure_threshold`           | 5       | consecutive failures that open the circuit; 0 disables it |
/// | `open_duration`               | 30 s    | time the circuit stays open before a probe                |
/// | `max_half_open_trials`        | 1       | concurrent probes while half-open                         |
/// | `max_concurrent`              | 64      | bulkhead permits                                          |
/// | `max_wait`                    | none    | bound of the wait for a permit; zero fails fast           |
/// | `max_attempts`                | 3       | attempts per request, the first one included              |
/// | `base_delay`                  | 100 ms  | delay before the first retry                              |
/// | `max_delay`                   | 10 s    | cap of the exponential delay                              |
/// | `jitter`                      | true    | add uniform jitter of up to half the delay                |
/// | `attempt_timeout`             | none    | local timeout of a single attempt                         |
/// | `call_timeout`                | none    | local timeout of the whole request                        |
/// | `count_intermediate_failures` | true    | every failed attempt feeds the breaker, not only the last |
///
/// The configuration is validated once, when the [`Registry`][crate::Registry] is built.
///
/// With the `serde` feature the type can be deserialized; missing fields take their defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::DependencyConfig;
///
/// let config = DependencyConfig::default()
///     .failure_threshold(3)
///     .open_duration(Duration::from_secs(10))
///     .max_concurrent(16)
///     .attempt_timeout(Duration::from_millis(500));
/// # let _ = config;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct DependencyConfig {
    failure_threshold: u32,
    open_duration: Duration,
    max_half_open_trials: u32,
    max_concurrent: usize,
    max_wait: Option<Duration>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    attempt_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    count_intermediate_failures: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration: DEFAULT_OPEN_DURATION,
            max_half_open_trials: DEFAULT_MAX_HALF_OPEN_TRIALS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_wait: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_USE_JITTER,
            attempt_timeout: None,
            call_timeout: None,
            count_intermediate_failures: true,
        }
    }
}

impl DependencyConfig {
    /// Consecutive dependency failures that open the circuit. Zero disables the breaker.
    #[must_use]
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// How long the circuit stays open before admitting a probe.
    #[must_use]
    pub fn open_duration(mut self, open_duration: Duration) -> Self {
        self.open_duration = open_duration;
        self
    }

    /// Number of probes allowed concurrently while half-open.
    #[must_use]
    pub fn max_half_open_trials(mut self, max_half_open_trials: u32) -> Self {
        self.max_half_open_trials = max_half_open_trials;
        self
    }

    /// Number of attempts allowed to run concurrently against the dependency.
    #[must_use]
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Bounds the wait for a bulkhead permit. [`Duration::ZERO`] rejects immediately when full.
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Attempts per request, including the first one.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Cap of the exponential part of the delay.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Local timeout of a single attempt. A timed out attempt is a retryable failure.
    #[must_use]
    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    /// Local timeout of the whole request, combined with the caller's own deadline.
    #[must_use]
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    /// Whether every failed attempt of a request counts toward `failure_threshold`.
    ///
    /// When `false`, only the final failure of a request is reported to the breaker; failed
    /// attempts that are retried release their admission without a verdict.
    #[must_use]
    pub fn count_intermediate_failures(mut self, enabled: bool) -> Self {
        self.count_intermediate_failures = enabled;
        self
    }

    pub(crate) fn breaker_options(&self) -> BreakerOptions {
        BreakerOptions {
            failure_threshold: self.failure_threshold,
            open_duration: self.open_duration,
            max_half_open_trials: self.max_half_open_trials,
        }
    }

    pub(crate) fn bulkhead(&self) -> Bulkhead {
        Bulkhead::new(self.max_concurrent, self.max_wait)
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(self.max_attempts)
            .base_delay(self.base_delay)
            .max_delay(self.max_delay)
            .jitter(self.jitter)
    }

    pub(crate) fn get_attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub(crate) fn get_call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    pub(crate) fn counts_intermediate_failures(&self) -> bool {
        self.count_intermediate_failures
    }

    pub(crate) fn validate(&self, dependency: &Arc<str>) -> Result<(), ConfigError> {
        let invalid = |reason| {
            Err(ConfigError::Invalid {
                dependency: Arc::clone(dependency),
                reason,
            })
        };

        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be greater than zero");
        }

        if self.max_concurrent > Bulkhead::MAX_PERMITS {
            return invalid("max_concurrent exceeds the supported maximum");
        }

        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least one");
        }

        if self.failure_threshold > 0 && self.max_half_open_trials == 0 {
            return invalid("max_half_open_trials must be greater than zero");
        }

        if self.base_delay > self.max_delay {
            return invalid("base_delay must not exceed max_delay");
        }

        if self.attempt_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return invalid("attempt_timeout must be greater than zero");
        }

        if self.call_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return invalid("call_timeout must be greater than zero");
        }

        Ok(())
    }
}
