// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`DeadlineScope`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DoneReason {
    /// The scope, or one of its ancestors, was cancelled.
    Cancelled,

    /// The effective deadline of the scope passed.
    DeadlineExceeded,
}

impl DoneReason {
    /// Returns a short, stable `snake_case` name of the reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl Display for DoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded, cancellable execution scope.
///
/// A scope combines a cancellation signal with an optional absolute deadline. Scopes form a
/// tree: a scope derived from a parent is cancelled together with the parent, and its
/// effective deadline is the earlier of the parent's deadline and its own local timeout.
/// Cancelling a derived scope never affects the parent.
///
/// Cancellation is cooperative. Code running inside a scope observes [`DeadlineScope::done`]
/// (or uses [`DeadlineScope::run`]) and stops on its own; nothing is preempted.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::time::Duration;
///
/// use airbag::{DeadlineScope, DoneReason};
///
/// let request = DeadlineScope::root().derive(Some(Duration::from_secs(5)));
/// let attempt = request.derive(Some(Duration::from_secs(1)));
///
/// // The attempt inherits the tighter of the two limits.
/// assert!(attempt.deadline() < request.deadline());
///
/// request.cancel();
/// assert_eq!(attempt.done().await, DoneReason::Cancelled);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeadlineScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl DeadlineScope {
    /// Creates a scope with no deadline that is only done when cancelled.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a root scope driven by an external cancellation token.
    ///
    /// Cancelling `token` cancels the scope and everything derived from it.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Derives a child scope with an optional local timeout measured from now.
    ///
    /// The effective deadline is the minimum of the parent's deadline and `now + timeout`.
    #[must_use]
    pub fn derive(&self, timeout: Option<Duration>) -> Self {
        let local = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        self.derive_until(local)
    }

    /// Derives a child scope with an optional absolute local deadline.
    #[must_use]
    pub fn derive_until(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.deadline, deadline) {
            (Some(parent), Some(local)) => Some(parent.min(local)),
            (parent, local) => parent.or(local),
        };

        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Resolves when the scope is done and tells why.
    ///
    /// Cancellation wins when both conditions hold at the same time.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => DoneReason::Cancelled,
                    () = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }

    /// Runs `future` inside the scope, giving up when the scope is done first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, DoneReason> {
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = future => Ok(output),
        }
    }

    /// Cancels this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns why the scope is done, or `None` while it is still live.
    #[must_use]
    pub fn reason(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Returns `true` once the scope is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.reason().is_some()
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left until the deadline, if any. Zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the cancellation token backing this scope.
    ///
    /// Useful for handing cancellation to libraries that accept a [`CancellationToken`].
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(DeadlineScope: Send, Sync, Clone);
    }

    #[tokio::test(start_paused = true)]
    async fn derive_takes_the_earlier_deadline() {
        let parent = DeadlineScope::root().derive(Some(Duration::from_secs(1)));
        let tighter = parent.derive(Some(Duration::from_millis(200)));
        let looser = parent.derive(Some(Duration::from_secs(10)));
        let unbounded = parent.derive(None);

        assert_eq!(tighter.remaining(), Some(Duration::from_millis(200)));
        assert_eq!(looser.deadline(), parent.deadline());
        assert_eq!(unbounded.deadline(), parent.deadline());
        assert_eq!(DeadlineScope::root().remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires() {
        let scope = DeadlineScope::root().derive(Some(Duration::from_millis(100)));
        assert_eq!(scope.reason(), None);

        let started = Instant::now();
        assert_eq!(scope.done().await, DoneReason::DeadlineExceeded);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(scope.reason(), Some(DoneReason::DeadlineExceeded));
        assert_eq!(scope.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn cancellation_cascades_down_but_not_up() {
        let parent = DeadlineScope::root();
        let child = parent.derive(None);
        let grandchild = child.derive(Some(Duration::from_secs(60)));

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
        assert_eq!(grandchild.done().await, DoneReason::Cancelled);

        let sibling = parent.derive(None);
        parent.cancel();
        assert_eq!(sibling.reason(), Some(DoneReason::Cancelled));
    }

    #[tokio::test]
    async fn external_token_drives_scope() {
        let token = CancellationToken::new();
        let scope = DeadlineScope::from_token(token.clone()).derive(None);

        token.cancel();
        assert_eq!(scope.done().await, DoneReason::Cancelled);
        assert!(scope.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_waiting_at_deadline() {
        let scope = DeadlineScope::root().derive(Some(Duration::from_millis(50)));

        let slow = scope.run(tokio::time::sleep(Duration::from_secs(1))).await;
        assert_eq!(slow, Err(DoneReason::DeadlineExceeded));

        let scope = DeadlineScope::root().derive(Some(Duration::from_secs(1)));
        let fast = scope.run(async { 7 }).await;
        assert_eq!(fast, Ok(7));
    }

    #[test]
    fn reason_labels() {
        assert_eq!(DoneReason::Cancelled.to_string(), "cancelled");
        assert_eq!(DoneReason::DeadlineExceeded.as_str(), "deadline_exceeded");
    }
}
