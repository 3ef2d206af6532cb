// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Observability hooks.
//!
//! The call core does not emit metrics itself. It exposes two callbacks that an external
//! metrics or logging collaborator can subscribe to:
//!
//! - [`RegistryBuilder::on_state_change`][crate::RegistryBuilder::on_state_change], invoked with
//!   [`StateChangeArgs`] once per circuit transition, after the breaker lock is released.
//! - [`CallExecutor::on_call_completed`][crate::CallExecutor::on_call_completed], invoked with
//!   [`CallCompletedArgs`] exactly once per request addressed to a registered dependency.
//!
//! Hooks run inline on the calling task and should return quickly.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{CircuitState, Transition};
use crate::utils::define_hook;
use crate::{ErrorKind, TraceContext};

define_hook!(OnStateChange(Fn(args: StateChangeArgs)));
define_hook!(OnCallCompleted(Fn(args: CallCompletedArgs)));

/// Arguments of the state change hook.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct StateChangeArgs {
    pub(crate) dependency: Arc<str>,
    pub(crate) transition: Transition,
}

impl StateChangeArgs {
    /// Name of the dependency whose circuit changed.
    #[must_use]
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// State before the change.
    #[must_use]
    pub fn from(&self) -> CircuitState {
        self.transition.from()
    }

    /// State after the change.
    #[must_use]
    pub fn to(&self) -> CircuitState {
        self.transition.to()
    }

    /// The transition as a whole.
    #[must_use]
    pub fn transition(&self) -> Transition {
        self.transition
    }
}

/// Final status of a call request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallStatus {
    /// The operation succeeded.
    Success,

    /// The call failed.
    Failed {
        /// The [`CallError::as_label`][crate::CallError::as_label] of the error.
        label: &'static str,
        /// Classification of the error.
        kind: ErrorKind,
    },
}

impl CallStatus {
    /// Returns `"success"` or the label of the error.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { label, .. } => label,
        }
    }

    /// Returns `true` for [`CallStatus::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of the call completed hook.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CallCompletedArgs {
    pub(crate) dependency: Arc<str>,
    pub(crate) status: CallStatus,
    pub(crate) attempts: u32,
    pub(crate) latency: Duration,
    pub(crate) trace: TraceContext,
}

impl CallCompletedArgs {
    /// Name of the dependency.
    #[must_use]
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Final status of the request.
    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Number of attempts that ran the operation. Zero when the request was rejected upfront.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time from submission to the final outcome, backoff included.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Trace metadata of the caller.
    #[must_use]
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }
}
