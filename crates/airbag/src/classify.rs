// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

use recoverable::{Recovery, RecoveryInfo, RecoveryKind};

/// Coarse classification of a failed call.
///
/// The kind drives two independent decisions:
///
/// - whether the failure may be retried, through its [`RecoveryInfo`], and
/// - whether it says something about the health of the dependency and therefore feeds the
///   circuit breaker ([`ErrorKind::is_dependency_failure`]).
///
/// | Kind               | Recovery      | Counts against the breaker |
/// |--------------------|---------------|----------------------------|
/// | `Timeout`          | `retry`       | yes                        |
/// | `Unavailable`      | `unavailable` | yes                        |
/// | `ConnectionReset`  | `retry`       | yes                        |
/// | `InvalidArgument`  | `never`       | no                         |
/// | `PermissionDenied` | `never`       | no                         |
/// | `AlreadyExists`    | `never`       | no                         |
/// | `Validation`       | `never`       | no                         |
/// | `Cancelled`        | `never`       | no                         |
/// | `Unknown`          | `unknown`     | yes                        |
///
/// # Handling Unknown Variants
///
/// This enum is `#[non_exhaustive]`. When matching on it, treat unrecognized variants the same
/// way as [`ErrorKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The dependency did not answer in time.
    Timeout,

    /// The dependency is temporarily unable to serve the call.
    Unavailable,

    /// The connection to the dependency was reset or aborted mid-call.
    ConnectionReset,

    /// The request itself is malformed; repeating it cannot help.
    InvalidArgument,

    /// The caller is not allowed to perform the operation.
    PermissionDenied,

    /// The resource the call tries to create already exists.
    AlreadyExists,

    /// A business rule rejected the request.
    Validation,

    /// The caller gave up on the call.
    Cancelled,

    /// The failure could not be classified.
    ///
    /// Unknown failures are not retried, but they do count as dependency failures.
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for transient failures that are worth another attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use airbag::ErrorKind;
    ///
    /// assert!(ErrorKind::Timeout.is_retryable());
    /// assert!(!ErrorKind::PermissionDenied.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(self) -> bool {
        is_retryable(&self.recovery())
    }

    /// Returns `true` when the failure reflects on the health of the remote dependency.
    ///
    /// Business and validation errors are answers from a healthy dependency and do not count.
    #[must_use]
    pub fn is_dependency_failure(self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable | Self::ConnectionReset | Self::Unknown)
    }

    /// Returns a short, stable `snake_case` name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::ConnectionReset => "connection_reset",
            Self::InvalidArgument => "invalid_argument",
            Self::PermissionDenied => "permission_denied",
            Self::AlreadyExists => "already_exists",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorKind {}

impl Recovery for ErrorKind {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Timeout | Self::ConnectionReset => RecoveryInfo::retry(),
            Self::Unavailable => RecoveryInfo::unavailable(),
            Self::InvalidArgument | Self::PermissionDenied | Self::AlreadyExists | Self::Validation | Self::Cancelled => {
                RecoveryInfo::never()
            }
            Self::Unknown => RecoveryInfo::unknown(),
        }
    }
}

/// Both transient kinds are retried; `never` and `unknown` are not.
pub(crate) fn is_retryable(recovery: &RecoveryInfo) -> bool {
    matches!(recovery.kind(), RecoveryKind::Retry | RecoveryKind::Unavailable)
}

/// Classifies an error returned by a remote operation.
///
/// Operations executed through [`CallExecutor`][crate::CallExecutor] return errors that
/// implement this trait, which lets the executor decide about retries and breaker accounting
/// without knowing anything about the transport.
///
/// The breaker looks at [`kind`][Classify::kind]. The retry policy looks at
/// [`recovery_info`][Classify::recovery_info], which defaults to the [`Recovery`] of the kind.
///
/// # Examples
///
/// ```
/// use airbag::{Classify, ErrorKind};
///
/// #[derive(Debug)]
/// enum InventoryError {
///     Overloaded,
///     UnknownSku,
/// }
///
/// impl Classify for InventoryError {
///     fn kind(&self) -> ErrorKind {
///         match self {
///             Self::Overloaded => ErrorKind::Unavailable,
///             Self::UnknownSku => ErrorKind::InvalidArgument,
///         }
///     }
/// }
///
/// assert!(InventoryError::Overloaded.kind().is_retryable());
/// assert!(!InventoryError::UnknownSku.kind().is_retryable());
/// ```
///
/// A dependency that asks for a pause, typically through a `Retry-After` header, reports it
/// as a delay on the recovery info:
///
/// ```
/// use std::time::Duration;
///
/// use airbag::{Classify, ErrorKind, RecoveryInfo};
///
/// #[derive(Debug)]
/// struct Throttled {
///     after: Duration,
/// }
///
/// impl Classify for Throttled {
///     fn kind(&self) -> ErrorKind {
///         ErrorKind::Unavailable
///     }
///
///     fn recovery_info(&self) -> RecoveryInfo {
///         RecoveryInfo::unavailable().delay(self.after)
///     }
/// }
///
/// let error = Throttled { after: Duration::from_secs(2) };
/// assert_eq!(error.recovery_info().get_delay(), Some(Duration::from_secs(2)));
/// ```
pub trait Classify {
    /// Returns the classification of this error.
    fn kind(&self) -> ErrorKind;

    /// Whether and how the failed attempt may be recovered from.
    ///
    /// Only `retry` and `unavailable` are retried. A delay on the info is the minimum wait the
    /// dependency asked for; the retry policy never waits less, but it still refuses to wait
    /// past the request deadline.
    fn recovery_info(&self) -> RecoveryInfo {
        self.kind().recovery()
    }
}

impl Classify for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn kind(&self) -> ErrorKind {
        (**self).kind()
    }

    fn recovery_info(&self) -> RecoveryInfo {
        (**self).recovery_info()
    }
}

impl Classify for std::io::Error {
    fn kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;

        match self.kind() {
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe | Io::UnexpectedEof => ErrorKind::ConnectionReset,
            Io::ConnectionRefused | Io::NotConnected | Io::AddrNotAvailable | Io::Interrupted | Io::WouldBlock => {
                ErrorKind::Unavailable
            }
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidArgument,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Unknown,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        let retryable = [ErrorKind::Timeout, ErrorKind::Unavailable, ErrorKind::ConnectionReset];
        let permanent = [
            ErrorKind::InvalidArgument,
            ErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists,
            ErrorKind::Validation,
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ];

        assert!(retryable.iter().all(|k| k.is_retryable()));
        assert!(permanent.iter().all(|k| !k.is_retryable()));
    }

    #[test]
    fn unknown_counts_as_dependency_failure() {
        assert!(ErrorKind::Unknown.is_dependency_failure());
        assert!(!ErrorKind::Validation.is_dependency_failure());
        assert!(!ErrorKind::Cancelled.is_dependency_failure());
    }

    #[test]
    fn io_errors_are_classified() {
        let timeout = std::io::Error::from(std::io::ErrorKind::TimedOut);
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let other = std::io::Error::other("boom");

        assert_eq!(Classify::kind(&timeout), ErrorKind::Timeout);
        assert_eq!(Classify::kind(&reset), ErrorKind::ConnectionReset);
        assert_eq!(Classify::kind(&refused), ErrorKind::Unavailable);
        assert_eq!(Classify::kind(&denied), ErrorKind::PermissionDenied);
        assert_eq!(Classify::kind(&other), ErrorKind::Unknown);
    }

    #[test]
    fn boxed_errors_delegate() {
        let boxed: Box<dyn Classify> = Box::new(ErrorKind::AlreadyExists);
        assert_eq!(boxed.kind(), ErrorKind::AlreadyExists);
        assert_eq!(boxed.recovery_info(), RecoveryInfo::never());
    }

    #[test]
    fn kinds_map_to_recovery() {
        assert_eq!(ErrorKind::Timeout.recovery().kind(), RecoveryKind::Retry);
        assert_eq!(ErrorKind::Unavailable.recovery().kind(), RecoveryKind::Unavailable);
        assert_eq!(ErrorKind::Validation.recovery().kind(), RecoveryKind::Never);
        assert_eq!(ErrorKind::Unknown.recovery().kind(), RecoveryKind::Unknown);

        // The io mapping flows through the same table.
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(refused.recovery_info(), RecoveryInfo::unavailable());
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(ErrorKind::ConnectionReset.to_string(), "connection_reset");
    }
}
