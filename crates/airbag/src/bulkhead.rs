// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Concurrency isolation per dependency.
//!
//! A [`Bulkhead`] holds `max_concurrent` permits. Every attempt against a dependency runs while
//! holding one, so a slow dependency can tie up at most its own permits and never starves the
//! others. Permits are released by dropping the [`BulkheadPermit`], which makes the release
//! happen exactly once per successful acquisition.
//!
//! Waiting for a permit is bounded by the caller's [`DeadlineScope`] and, optionally, by a
//! per-dependency `max_wait`. A `max_wait` of zero turns the bulkhead into a fail-fast limiter.
//! Fairness between waiters is best-effort.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::{DeadlineScope, DoneReason};

/// Default number of concurrent attempts per dependency.
pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 64;

/// Bounded concurrency limiter of one dependency.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_wait: Option<Duration>,
}

/// A slot in a [`Bulkhead`]. The slot is freed when the permit is dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl BulkheadPermit {
    /// Releases the slot. Same as dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

/// Why a [`Bulkhead`] did not hand out a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BulkheadError {
    /// Every permit is taken and the bulkhead does not wait.
    #[error("bulkhead is full")]
    Full,

    /// No permit became available within `max_wait`.
    #[error("no bulkhead permit within {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The caller's scope finished while waiting.
    #[error("waiting for a bulkhead permit was interrupted: {reason}")]
    Interrupted {
        /// Why the scope finished.
        reason: DoneReason,
        /// How long the caller waited.
        waited: Duration,
    },
}

impl Bulkhead {
    /// `max_concurrent` must be validated by the caller (non-zero, within the semaphore limit).
    pub(crate) fn new(max_concurrent: usize, max_wait: Option<Duration>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_wait,
        }
    }

    /// Largest `max_concurrent` the bulkhead supports.
    pub(crate) const MAX_PERMITS: usize = Semaphore::MAX_PERMITS;

    /// Acquires a permit, waiting while the scope is live and `max_wait` has not elapsed.
    ///
    /// # Errors
    ///
    /// - [`BulkheadError::Full`] when no permit is free and `max_wait` is zero.
    /// - [`BulkheadError::Timeout`] when `max_wait` elapses first.
    /// - [`BulkheadError::Interrupted`] when the scope is cancelled or reaches its deadline first.
    pub async fn acquire(&self, scope: &DeadlineScope) -> Result<BulkheadPermit, BulkheadError> {
        if let Some(reason) = scope.reason() {
            return Err(BulkheadError::Interrupted {
                reason,
                waited: Duration::ZERO,
            });
        }

        match self.try_acquire() {
            Ok(permit) => return Ok(permit),
            Err(error) if self.max_wait == Some(Duration::ZERO) => return Err(error),
            Err(_) => {}
        }

        let started = Instant::now();
        let limit = async {
            match self.max_wait {
                Some(max_wait) => tokio::time::sleep(max_wait).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map(|permit| BulkheadPermit { _permit: permit })
                // The semaphore is never closed.
                .map_err(|_| BulkheadError::Full),
            reason = scope.done() => Err(BulkheadError::Interrupted {
                reason,
                waited: started.elapsed(),
            }),
            () = limit => Err(BulkheadError::Timeout {
                waited: started.elapsed(),
            }),
        }
    }

    /// Acquires a permit without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BulkheadError::Full`] when every permit is taken.
    pub fn try_acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(BulkheadPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => Err(BulkheadError::Full),
        }
    }

    /// Number of permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Number of permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of permits.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Upper bound of the wait for a permit, if any.
    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }
}
