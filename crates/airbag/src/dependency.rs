// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crate::DependencyConfig;
use crate::breaker::{CircuitBreaker, CircuitState, Enter, Ticket, Transition};
use crate::bulkhead::Bulkhead;
use crate::hooks::{OnStateChange, StateChangeArgs};
use crate::retry::RetryPolicy;

/// A logical remote target and the resilience state that guards it.
///
/// Each dependency exclusively owns one circuit breaker and one [`Bulkhead`]. Dependencies are
/// created by [`RegistryBuilder::build`][crate::RegistryBuilder::build] and live as long as the
/// [`Registry`][crate::Registry]; their settings never change afterwards.
#[derive(Debug)]
pub struct Dependency {
    name: Arc<str>,
    config: DependencyConfig,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    retry_policy: RetryPolicy,
    on_state_change: Option<OnStateChange>,
    #[cfg_attr(not(any(feature = "logs", test)), expect(dead_code, reason = "only read when logs are compiled in"))]
    logs_enabled: bool,
}

impl Dependency {
    pub(crate) fn new(name: Arc<str>, config: DependencyConfig, on_state_change: Option<OnStateChange>, logs_enabled: bool) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.breaker_options()),
            bulkhead: config.bulkhead(),
            retry_policy: config.retry_policy(),
            name,
            config,
            on_state_change,
            logs_enabled,
        }
    }

    /// Name of the dependency.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings the dependency was created with.
    #[must_use]
    pub fn config(&self) -> &DependencyConfig {
        &self.config
    }

    /// Current state of the circuit breaker.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Consecutive failures counted while the circuit is closed.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.consecutive_failures()
    }

    /// The concurrency limiter of the dependency.
    #[must_use]
    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// The retry policy applied when a request does not bring its own.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Asks the breaker for admission; `None` means the circuit rejected the attempt.
    pub(crate) fn enter(&self) -> Option<Admission<'_>> {
        match self.breaker.enter() {
            Enter::Accepted { ticket, transition } => {
                self.report(transition);
                Some(Admission {
                    dependency: self,
                    ticket: Some(ticket),
                })
            }
            Enter::Rejected => {
                self.report_rejected();
                None
            }
        }
    }

    // Called after the breaker lock is released.
    fn report(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };

        self.emit_transition_log(transition);

        if let Some(hook) = &self.on_state_change {
            hook.call(StateChangeArgs {
                dependency: Arc::clone(&self.name),
                transition,
            });
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_transition_log(&self, transition: Transition) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            use crate::telemetry::{CIRCUIT_CLOSED_EVENT, CIRCUIT_HALF_OPENED_EVENT, CIRCUIT_OPENED_EVENT};

            match transition.to() {
                CircuitState::Open => tracing::event!(
                    name: CIRCUIT_OPENED_EVENT,
                    tracing::Level::WARN,
                    dependency.name = %self.name,
                    circuit_breaker.state = transition.to().as_str(),
                    circuit_breaker.previous_state = transition.from().as_str(),
                    circuit_breaker.open_duration = self.breaker.options().open_duration.as_secs_f32(),
                ),
                CircuitState::HalfOpen => tracing::event!(
                    name: CIRCUIT_HALF_OPENED_EVENT,
                    tracing::Level::INFO,
                    dependency.name = %self.name,
                    circuit_breaker.state = transition.to().as_str(),
                    circuit_breaker.previous_state = transition.from().as_str(),
                ),
                CircuitState::Closed => tracing::event!(
                    name: CIRCUIT_CLOSED_EVENT,
                    tracing::Level::INFO,
                    dependency.name = %self.name,
                    circuit_breaker.state = transition.to().as_str(),
                    circuit_breaker.previous_state = transition.from().as_str(),
                ),
            }
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn report_rejected(&self) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: crate::telemetry::CIRCUIT_REJECTED_EVENT,
                tracing::Level::WARN,
                dependency.name = %self.name,
                circuit_breaker.state = self.breaker.state().as_str(),
            );
        }
    }
}

/// The breaker's permission for one attempt.
///
/// Exactly one verdict is reported per admission. An admission dropped without a verdict
/// (the attempt was rejected by the bulkhead, interrupted, panicked, or the caller dropped the
/// call) is reported as abandoned, which frees a half-open trial slot without changing state.
#[derive(Debug)]
pub(crate) struct Admission<'a> {
    dependency: &'a Dependency,
    ticket: Option<Ticket>,
}

impl Admission<'_> {
    pub(crate) fn success(mut self) {
        if let Some(ticket) = self.ticket.take() {
            let transition = self.dependency.breaker.on_success(ticket);
            self.dependency.report(transition);
        }
    }

    pub(crate) fn failure(mut self) {
        if let Some(ticket) = self.ticket.take() {
            let transition = self.dependency.breaker.on_failure(ticket);
            self.dependency.report(transition);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.dependency.breaker.on_abandoned(ticket);
        }
    }
}
