// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Names of the log events and their attributes.
//!
//! Events are emitted through `tracing` when the `logs` feature is enabled and the registry was
//! built with [`RegistryBuilder::enable_logs`][crate::RegistryBuilder]. The names below are
//! stable and can be used to filter or route the events.

/// The circuit of a dependency opened (from closed or half-open).
pub const CIRCUIT_OPENED_EVENT: &str = "airbag.circuit_breaker.opened";

/// The open period elapsed and the circuit admitted a probe.
pub const CIRCUIT_HALF_OPENED_EVENT: &str = "airbag.circuit_breaker.half_opened";

/// The last outstanding probe succeeded and the circuit closed.
pub const CIRCUIT_CLOSED_EVENT: &str = "airbag.circuit_breaker.closed";

/// An attempt was rejected by an open circuit.
pub const CIRCUIT_REJECTED_EVENT: &str = "airbag.circuit_breaker.rejected";

/// A failed attempt is retried after a delay.
pub const RETRY_EVENT: &str = "airbag.retry";

/// An attempt exceeded its attempt timeout.
pub const ATTEMPT_TIMEOUT_EVENT: &str = "airbag.attempt.timeout";

/// An operation finished after its attempt was already finalized; the result was discarded.
pub const ATTEMPT_LATE_RESULT_EVENT: &str = "airbag.attempt.late_result";

/// No bulkhead permit was obtained.
pub const BULKHEAD_REJECTED_EVENT: &str = "airbag.bulkhead.rejected";

/// Draining started.
pub const SHUTDOWN_STARTED_EVENT: &str = "airbag.shutdown.started";

/// The grace period elapsed and the remaining calls were force-cancelled.
pub const SHUTDOWN_FORCED_EVENT: &str = "airbag.shutdown.forced";

/// No call is in flight anymore; the process may terminate.
pub const SHUTDOWN_DRAINED_EVENT: &str = "airbag.shutdown.drained";

/// Name of the dependency.
pub const DEPENDENCY_NAME: &str = "dependency.name";

/// State of the circuit after the event.
pub const CIRCUIT_STATE: &str = "circuit_breaker.state";

/// State of the circuit before a transition.
pub const CIRCUIT_PREVIOUS_STATE: &str = "circuit_breaker.previous_state";

/// 0-based index of the attempt.
pub const ATTEMPT_INDEX: &str = "retry.attempt.index";

/// Delay before the next attempt, in seconds.
pub const RETRY_DELAY: &str = "retry.delay";

/// Classification of the failure.
pub const ERROR_KIND: &str = "error.kind";

/// Trace identifier from the caller's [`TraceContext`][crate::TraceContext].
pub const TRACE_ID: &str = "trace.id";
