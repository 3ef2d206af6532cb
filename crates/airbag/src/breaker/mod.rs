// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-dependency circuit breaking.
//!
//! Every [`Dependency`][crate::Dependency] owns one circuit breaker. The breaker is a small state
//! machine that decides whether an attempt may run at all:
//!
//! - **Closed**: every attempt runs. Consecutive dependency failures are counted; when the count
//!   reaches `failure_threshold`, the circuit opens.
//! - **Open**: attempts are rejected immediately with
//!   [`CallError::CircuitOpen`][crate::CallError::CircuitOpen]. Once `open_duration` has elapsed,
//!   the first caller flips the circuit to half-open and becomes a probe.
//! - **Half-open**: up to `max_half_open_trials` probes run concurrently. When the last
//!   outstanding probe succeeds the circuit closes; any probe failure reopens it.
//!
//! A `failure_threshold` of zero disables the breaker: it stays closed forever.
//!
//! State changes are observable through
//! [`RegistryBuilder::on_state_change`][crate::RegistryBuilder::on_state_change] and, with the
//! `logs` feature, as `airbag.circuit_breaker.*` events.

pub(crate) mod constants;
mod engine;

use std::fmt::Display;

pub(crate) use engine::{BreakerOptions, CircuitBreaker, Enter, Ticket};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,

    /// Attempts are rejected without being made.
    Open,

    /// A limited number of probe attempts test whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    /// Returns a short, stable `snake_case` name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change of [`CircuitState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    from: CircuitState,
    to: CircuitState,
}

impl Transition {
    pub(crate) fn new(from: CircuitState, to: CircuitState) -> Self {
        Self { from, to }
    }

    /// The state before the change.
    #[must_use]
    pub fn from(self) -> CircuitState {
        self.from
    }

    /// The state after the change.
    #[must_use]
    pub fn to(self) -> CircuitState {
        self.to
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// How an admitted attempt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Regular attempt in a closed circuit.
    Normal,

    /// Probe attempt in a half-open circuit.
    Probe,
}
