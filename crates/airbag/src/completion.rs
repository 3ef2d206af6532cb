// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-fire completion of an outcome.
//!
//! An attempt can be finalized from several places that race with each other: the operation
//! returning, the attempt deadline firing, or shutdown force-cancelling the request. A
//! [`CompletionGuard`] lets all of them try, and exactly one wins. The losers learn that they
//! lost from the `false` returned by [`CompletionGuard::complete`] and must discard their value.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner<T> {
    done: AtomicBool,
    slot: Mutex<Option<T>>,
    notify: Notify,
}

/// Producer side of a single-fire completion.
///
/// The guard is cheap to clone; every clone races for the same slot.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use airbag::CompletionGuard;
///
/// let (guard, completion) = CompletionGuard::new();
///
/// assert!(guard.complete("first"));
/// assert!(!guard.complete("second"));
///
/// assert_eq!(completion.wait().await, "first");
/// # }
/// ```
pub struct CompletionGuard<T> {
    inner: Arc<Inner<T>>,
}

/// Receiver side of a single-fire completion.
///
/// There is exactly one receiver per guard; it yields the value of the winning
/// [`CompletionGuard::complete`] call.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> CompletionGuard<T> {
    /// Creates a guard together with its receiver.
    #[must_use]
    pub fn new() -> (Self, Completion<T>) {
        let inner = Arc::new(Inner {
            done: AtomicBool::new(false),
            slot: Mutex::new(None),
            notify: Notify::new(),
        });

        (
            Self {
                inner: Arc::clone(&inner),
            },
            Completion { inner },
        )
    }

    /// Offers an outcome.
    ///
    /// Returns `true` only for the first call across all clones of the guard; every later call
    /// drops `outcome` and returns `false`.
    pub fn complete(&self, outcome: T) -> bool {
        if self
            .inner
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *self.inner.slot.lock() = Some(outcome);
        self.inner.notify.notify_one();
        true
    }

    /// Returns `true` once some outcome has won.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }
}

impl<T> Clone for CompletionGuard<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for CompletionGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionGuard").field("completed", &self.is_completed()).finish()
    }
}

impl<T> Completion<T> {
    /// Waits for the winning outcome.
    ///
    /// The future never resolves if no guard ever completes, so callers always keep a path
    /// (a deadline or a cancellation) that completes the guard themselves.
    pub async fn wait(self) -> T {
        loop {
            // Register interest before checking the slot so a concurrent `complete` cannot slip
            // between the check and the wait.
            let notified = self.inner.notify.notified();

            if let Some(outcome) = self.inner.slot.lock().take() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Takes the outcome if it is already available.
    pub fn try_take(&mut self) -> Option<T> {
        self.inner.slot.lock().take()
    }
}

impl<T> Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.inner.done.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(CompletionGuard<String>: Send, Sync, Clone, Debug);
        static_assertions::assert_impl_all!(Completion<String>: Send, Sync, Debug);
    }

    #[test]
    fn first_complete_wins() {
        let (guard, mut completion) = CompletionGuard::new();
        assert!(!guard.is_completed());

        assert!(guard.complete(1));
        assert!(!guard.clone().complete(2));
        assert!(guard.is_completed());

        assert_eq!(completion.try_take(), Some(1));
        assert_eq!(completion.try_take(), None);
    }

    #[tokio::test]
    async fn wait_sees_value_completed_before_waiting() {
        let (guard, completion) = CompletionGuard::new();
        guard.complete("done");

        assert_eq!(completion.wait().await, "done");
    }

    #[tokio::test]
    async fn wait_is_woken_by_later_completion() {
        let (guard, completion) = CompletionGuard::new();

        let handle = tokio::spawn(async move { completion.wait().await });
        tokio::task::yield_now().await;
        assert!(guard.complete(42));

        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_of_many_racers_wins() {
        for _ in 0..50 {
            let (guard, completion) = CompletionGuard::new();
            let winners = Arc::new(AtomicUsize::new(0));

            let racers: Vec<_> = (0..8)
                .map(|i| {
                    let guard = guard.clone();
                    let winners = Arc::clone(&winners);
                    tokio::spawn(async move {
                        if guard.complete(i) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for racer in racers {
                racer.await.unwrap();
            }

            let value = completion.wait().await;
            assert!((0..8).contains(&value));
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
