// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coordinated drain on shutdown.
//!
//! The process manager calls [`ShutdownCoordinator::notify_shutdown`] once. From then on:
//!
//! 1. New calls are refused with [`CallError::ShuttingDown`][crate::CallError::ShuttingDown].
//! 2. Calls already in flight may finish until the grace period elapses.
//! 3. Calls still running after the grace period have their scopes cancelled.
//! 4. [`ShutdownCoordinator::drained`] resolves once no call is in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ShutdownError;

/// Process-wide lifecycle manager of the call core.
///
/// The coordinator is cheap to clone; all clones share the same state. It never owns the
/// calls it tracks: it only counts them and keeps the cancellation handles of their scopes.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::time::Duration;
///
/// use airbag::ShutdownCoordinator;
///
/// let coordinator = ShutdownCoordinator::new();
/// assert!(coordinator.notify_shutdown(Duration::from_secs(5)));
/// assert!(!coordinator.notify_shutdown(Duration::from_secs(1)));
///
/// // Nothing is in flight, so draining completes immediately.
/// coordinator.drained().await;
/// assert!(coordinator.is_draining());
/// assert!(!coordinator.is_forced());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
    #[cfg_attr(not(any(feature = "logs", test)), expect(dead_code, reason = "only read when logs are compiled in"))]
    logs_enabled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    draining: AtomicBool,
    driving: AtomicBool,
    forced: AtomicBool,
    forced_calls: AtomicUsize,
    in_flight: AtomicUsize,
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, CancellationToken>>,
    grace: Mutex<Option<Grace>>,
    idle: Notify,
    drained: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
struct Grace {
    period: Duration,
    deadline: Option<Instant>,
}

/// Registration of one in-flight call. Dropping it ends the registration.
#[derive(Debug)]
pub(crate) struct InFlight {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.active.lock().remove(&self.id);
        self.inner.leave();
    }
}

impl Inner {
    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 && self.draining.load(Ordering::SeqCst) {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }

            notified.await;
        }
    }
}

impl ShutdownCoordinator {
    /// Creates a coordinator that admits calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables structured logging of the shutdown sequence.
    #[must_use]
    #[cfg(any(feature = "logs", test))]
    pub fn enable_logs(mut self) -> Self {
        self.logs_enabled = true;
        self
    }

    pub(crate) fn with_logs(mut self, enabled: bool) -> Self {
        self.logs_enabled = enabled;
        self
    }

    /// Registers a call whose scope is cancelled by `token`.
    ///
    /// Returns `None` once draining has started. The call counts as in flight until the returned
    /// registration is dropped.
    pub(crate) fn admit(&self, token: CancellationToken) -> Option<InFlight> {
        // Count first, then check: a drain that starts after this point waits for the call.
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        if self.inner.draining.load(Ordering::SeqCst) {
            self.inner.leave();
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.active.lock().insert(id, token.clone());

        // Force-cancellation may have swept the active set before the insert above.
        if self.inner.forced.load(Ordering::SeqCst) {
            token.cancel();
        }

        Some(InFlight {
            inner: Arc::clone(&self.inner),
            id,
        })
    }

    /// Starts draining with the given grace period.
    ///
    /// Only the first call has an effect and returns `true`. When called inside a Tokio runtime
    /// the drain proceeds in the background; otherwise it starts with the first
    /// [`drained`][Self::drained] call.
    pub fn notify_shutdown(&self, grace: Duration) -> bool {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return false;
        }

        *self.inner.grace.lock() = Some(Grace {
            period: grace,
            deadline: Instant::now().checked_add(grace),
        });

        self.emit_started_log(grace);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            self.spawn_driver(&handle);
        }

        true
    }

    /// Resolves once draining has started and no call is in flight anymore.
    ///
    /// Before [`notify_shutdown`][Self::notify_shutdown] this never resolves.
    pub async fn drained(&self) {
        if self.inner.draining.load(Ordering::SeqCst) {
            self.spawn_driver(&tokio::runtime::Handle::current());
        }

        self.inner.drained.cancelled().await;

        // notify_shutdown may have arrived while waiting; the driver it spawned cancels `drained`.
    }

    /// Drains with the given grace period and waits until done.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::GraceExceeded`] if some calls had to be force-cancelled.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ShutdownError> {
        self.notify_shutdown(grace);
        self.drained().await;

        if self.is_forced() {
            let period = (*self.inner.grace.lock()).map_or(grace, |grace| grace.period);
            return Err(ShutdownError::GraceExceeded {
                grace: period,
                forced: self.inner.forced_calls.load(Ordering::SeqCst),
            });
        }

        Ok(())
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Returns `true` once new calls are refused.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Returns `true` once the grace period elapsed with calls still in flight.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.inner.forced.load(Ordering::SeqCst)
    }

    /// Returns `true` once draining has completed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.inner.drained.is_cancelled()
    }

    fn spawn_driver(&self, handle: &tokio::runtime::Handle) {
        if self.inner.driving.swap(true, Ordering::SeqCst) {
            return;
        }

        handle.spawn(self.clone().drive());
    }

    async fn drive(self) {
        let deadline = (*self.inner.grace.lock()).and_then(|grace| grace.deadline);

        let idle = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.inner.wait_idle()).await.is_ok(),
            None => {
                self.inner.wait_idle().await;
                true
            }
        };

        if !idle {
            self.inner.forced.store(true, Ordering::SeqCst);

            let tokens: Vec<_> = self.inner.active.lock().values().cloned().collect();
            self.inner.forced_calls.store(tokens.len(), Ordering::SeqCst);
            self.emit_forced_log(tokens.len());

            for token in tokens {
                token.cancel();
            }

            self.inner.wait_idle().await;
        }

        self.emit_drained_log();
        self.inner.drained.cancel();
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_started_log(&self, grace: Duration) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: crate::telemetry::SHUTDOWN_STARTED_EVENT,
                tracing::Level::INFO,
                shutdown.grace = grace.as_secs_f32(),
                shutdown.in_flight = self.in_flight(),
            );
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_forced_log(&self, forced: usize) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: crate::telemetry::SHUTDOWN_FORCED_EVENT,
                tracing::Level::WARN,
                shutdown.forced = forced,
            );
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_drained_log(&self) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: crate::telemetry::SHUTDOWN_DRAINED_EVENT,
                tracing::Level::INFO,
                shutdown.forced = self.is_forced(),
            );
        }
    }
}
