// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Errors surfaced by the call core.
//!
//! - [`CallError`]: the outcome of a failed call, returned by [`CallExecutor`][crate::CallExecutor].
//! - [`AttemptError`]: the last failure of a request whose retry budget ran out.
//! - [`ConfigError`]: misconfiguration detected while building a [`Registry`][crate::Registry].
//! - [`ShutdownError`]: a drain that needed force-cancellation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::{Classify, ErrorKind, Recovery, RecoveryInfo};

/// Error returned by [`CallExecutor`][crate::CallExecutor] when a call does not succeed.
///
/// Resilience failures (open circuit, full bulkhead, deadline, shutdown) are reported verbatim.
/// Failures of the operation itself are never swallowed: the original error is reachable through
/// [`std::error::Error::source`] or [`CallError::into_operation_error`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// No dependency with this name was registered.
    #[error("dependency `{dependency}` is not registered")]
    UnknownDependency {
        /// Name passed by the caller.
        dependency: Arc<str>,
    },

    /// The process is draining and refuses new calls.
    #[error("call to `{dependency}` refused: shutting down")]
    ShuttingDown {
        /// Name of the dependency.
        dependency: Arc<str>,
    },

    /// The circuit breaker is protecting the dependency; no attempt was made.
    #[error("circuit for `{dependency}` is open")]
    CircuitOpen {
        /// Name of the dependency.
        dependency: Arc<str>,
    },

    /// Every bulkhead permit is taken and the dependency is configured to fail fast.
    #[error("bulkhead for `{dependency}` is full")]
    BulkheadFull {
        /// Name of the dependency.
        dependency: Arc<str>,
    },

    /// No bulkhead permit became available in time.
    #[error("no `{dependency}` bulkhead permit within {waited:?}")]
    BulkheadTimeout {
        /// Name of the dependency.
        dependency: Arc<str>,
        /// How long the call waited for a permit.
        waited: Duration,
    },

    /// The deadline of the request (the caller's or the configured call timeout) passed.
    #[error("deadline exceeded calling `{dependency}`")]
    DeadlineExceeded {
        /// Name of the dependency.
        dependency: Arc<str>,
    },

    /// The caller cancelled the request.
    #[error("call to `{dependency}` was cancelled")]
    Cancelled {
        /// Name of the dependency.
        dependency: Arc<str>,
    },

    /// The operation failed with an error that must not be retried.
    #[error("call to `{dependency}` failed")]
    NonRetryable {
        /// Name of the dependency.
        dependency: Arc<str>,
        /// The error returned by the operation, unchanged.
        #[source]
        source: E,
    },

    /// Every attempt failed with a retryable error and no further attempt is allowed.
    ///
    /// The retry budget runs out either because `max_attempts` was reached or because waiting
    /// for the next attempt would cross the request deadline.
    #[error("call to `{dependency}` failed after {attempts} attempt(s)")]
    RetriesExhausted {
        /// Name of the dependency.
        dependency: Arc<str>,
        /// Number of attempts that were made.
        attempts: u32,
        /// The failure of the last attempt.
        #[source]
        source: AttemptError<E>,
    },
}

impl<E> CallError<E> {
    /// Returns the name of the dependency the call was addressed to.
    #[must_use]
    pub fn dependency(&self) -> &str {
        match self {
            Self::UnknownDependency { dependency }
            | Self::ShuttingDown { dependency }
            | Self::CircuitOpen { dependency }
            | Self::BulkheadFull { dependency }
            | Self::BulkheadTimeout { dependency, .. }
            | Self::DeadlineExceeded { dependency }
            | Self::Cancelled { dependency }
            | Self::NonRetryable { dependency, .. }
            | Self::RetriesExhausted { dependency, .. } => dependency,
        }
    }

    /// Returns a short stable label (`snake_case`) for use in logs and metrics.
    ///
    /// # Example
    /// ```
    /// use airbag::CallError;
    ///
    /// let err: CallError<std::io::Error> = CallError::CircuitOpen { dependency: "auth".into() };
    /// assert_eq!(err.as_label(), "circuit_open");
    /// ```
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::ShuttingDown { .. } => "shutting_down",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadFull { .. } => "bulkhead_full",
            Self::BulkheadTimeout { .. } => "bulkhead_timeout",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Cancelled { .. } => "cancelled",
            Self::NonRetryable { .. } => "non_retryable",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Returns `true` if the call failed because some time limit was reached.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::BulkheadTimeout { .. }
                | Self::DeadlineExceeded { .. }
                | Self::RetriesExhausted {
                    source: AttemptError::TimedOut { .. },
                    ..
                }
        )
    }

    /// Returns the error produced by the operation, if the call got that far.
    #[must_use]
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::NonRetryable { source, .. }
            | Self::RetriesExhausted {
                source: AttemptError::Operation(source),
                ..
            } => Some(source),
            _ => None,
        }
    }

    /// Consumes the error and returns the error produced by the operation, if any.
    #[must_use]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::NonRetryable { source, .. }
            | Self::RetriesExhausted {
                source: AttemptError::Operation(source),
                ..
            } => Some(source),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for CallError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDependency { .. } => ErrorKind::InvalidArgument,
            Self::ShuttingDown { .. } | Self::CircuitOpen { .. } | Self::BulkheadFull { .. } | Self::BulkheadTimeout { .. } => {
                ErrorKind::Unavailable
            }
            Self::DeadlineExceeded { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::NonRetryable { source, .. } => source.kind(),
            Self::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    fn recovery_info(&self) -> RecoveryInfo {
        match self.operation_error() {
            Some(error) => error.recovery_info(),
            None => self.kind().recovery(),
        }
    }
}

impl<E: Classify> Recovery for CallError<E> {
    fn recovery(&self) -> RecoveryInfo {
        self.recovery_info()
    }
}

/// The failure of a single attempt.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The operation returned an error.
    #[error(transparent)]
    Operation(E),

    /// The attempt did not finish within the configured attempt timeout.
    #[error("attempt timed out after {timeout:?}")]
    TimedOut {
        /// The attempt timeout that elapsed.
        timeout: Duration,
    },
}

impl<E: Classify> Classify for AttemptError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation(error) => error.kind(),
            Self::TimedOut { .. } => ErrorKind::Timeout,
        }
    }

    fn recovery_info(&self) -> RecoveryInfo {
        match self {
            Self::Operation(error) => error.recovery_info(),
            Self::TimedOut { .. } => RecoveryInfo::retry(),
        }
    }
}

impl<E: Classify> Recovery for AttemptError<E> {
    fn recovery(&self) -> RecoveryInfo {
        self.recovery_info()
    }
}

/// Misconfiguration detected while building a [`Registry`][crate::Registry].
///
/// These are programming errors; they are reported once at startup and never at call time.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A dependency was registered with an empty name.
    #[error("dependency name must not be empty")]
    EmptyName,

    /// The same dependency name was registered twice.
    #[error("dependency `{dependency}` is registered more than once")]
    Duplicate {
        /// The duplicated name.
        dependency: Arc<str>,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration for `{dependency}`: {reason}")]
    Invalid {
        /// Name of the offending dependency.
        dependency: Arc<str>,
        /// What is wrong with the configuration.
        reason: &'static str,
    },
}

/// Errors produced while draining the call core.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The grace period elapsed and the remaining calls were force-cancelled.
    #[error("shutdown grace period {grace:?} exceeded; force-cancelled {forced} call(s)")]
    GraceExceeded {
        /// The configured grace period.
        grace: Duration,
        /// Number of calls that were still in flight when the grace period elapsed.
        forced: usize,
    },
}

impl ShutdownError {
    /// Returns a short stable label (`snake_case`) for use in logs and metrics.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::GraceExceeded { .. } => "shutdown_grace_exceeded",
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    fn name() -> Arc<str> {
        Arc::from("inventory")
    }

    #[test]
    fn retries_exhausted_keeps_the_cause() {
        let err: CallError<std::io::Error> = CallError::RetriesExhausted {
            dependency: name(),
            attempts: 3,
            source: AttemptError::Operation(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        };

        assert_eq!(err.to_string(), "call to `inventory` failed after 3 attempt(s)");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("reset by peer"));
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert_eq!(err.dependency(), "inventory");
        assert!(!err.is_timeout());

        let cause = err.into_operation_error().expect("operation error must be retrievable");
        assert_eq!(cause.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn timed_out_attempt_is_a_timeout() {
        let err: CallError<std::io::Error> = CallError::RetriesExhausted {
            dependency: name(),
            attempts: 2,
            source: AttemptError::TimedOut {
                timeout: Duration::from_millis(250),
            },
        };

        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.operation_error().is_none());
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("attempt timed out after 250ms"));
    }

    #[test]
    fn resilience_errors_classify_as_unavailable() {
        let open: CallError<ErrorKind> = CallError::CircuitOpen { dependency: name() };
        let full: CallError<ErrorKind> = CallError::BulkheadFull { dependency: name() };
        let draining: CallError<ErrorKind> = CallError::ShuttingDown { dependency: name() };

        assert_eq!(open.kind(), ErrorKind::Unavailable);
        assert_eq!(full.kind(), ErrorKind::Unavailable);
        assert_eq!(draining.kind(), ErrorKind::Unavailable);
        assert!(open.source().is_none());
    }

    #[test]
    fn recovery_follows_the_operation_error() {
        let exhausted: CallError<ErrorKind> = CallError::RetriesExhausted {
            dependency: name(),
            attempts: 3,
            source: AttemptError::Operation(ErrorKind::Validation),
        };
        let timed_out: CallError<ErrorKind> = CallError::RetriesExhausted {
            dependency: name(),
            attempts: 3,
            source: AttemptError::TimedOut {
                timeout: Duration::from_millis(250),
            },
        };
        let open: CallError<ErrorKind> = CallError::CircuitOpen { dependency: name() };

        assert_eq!(exhausted.recovery(), RecoveryInfo::never());
        assert_eq!(timed_out.recovery(), RecoveryInfo::retry());
        assert_eq!(open.recovery(), RecoveryInfo::unavailable());
    }

    #[test]
    fn labels_are_stable() {
        let cancelled: CallError<ErrorKind> = CallError::Cancelled { dependency: name() };
        let deadline: CallError<ErrorKind> = CallError::DeadlineExceeded { dependency: name() };
        let non_retryable: CallError<ErrorKind> = CallError::NonRetryable {
            dependency: name(),
            source: ErrorKind::Validation,
        };

        assert_eq!(cancelled.as_label(), "cancelled");
        assert_eq!(deadline.as_label(), "deadline_exceeded");
        assert_eq!(non_retryable.as_label(), "non_retryable");
        assert_eq!(non_retryable.kind(), ErrorKind::Validation);
    }

    #[test]
    fn shutdown_error_label() {
        let err = ShutdownError::GraceExceeded {
            grace: Duration::from_secs(5),
            forced: 2,
        };
        assert_eq!(err.as_label(), "shutdown_grace_exceeded");
        assert_eq!(err.to_string(), "shutdown grace period 5s exceeded; force-cancelled 2 call(s)");
    }
}
