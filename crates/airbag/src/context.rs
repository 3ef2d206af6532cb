// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::DeadlineScope;

/// Read-only trace metadata carried alongside a call.
///
/// The call core never interprets it; it is only handed to hooks and log events so that the
/// external tracing collaborator can correlate them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: Option<Arc<str>>,
    baggage: Arc<BTreeMap<String, String>>,
}

impl TraceContext {
    /// Creates an empty trace context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the trace identifier.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<Arc<str>>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Adds a baggage entry, replacing an existing entry with the same key.
    #[must_use]
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.baggage).insert(key.into(), value.into());
        self
    }

    /// Returns the trace identifier, if any.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Returns the baggage value stored under `key`.
    #[must_use]
    pub fn baggage(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// Iterates over all baggage entries in key order.
    pub fn baggage_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.baggage.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Caller context of a call: its cancellation, deadline and trace metadata.
///
/// Operations executed by [`CallExecutor`][crate::CallExecutor] receive a `CallContext` scoped
/// to the current attempt. Passing that context to nested calls makes cancellation and
/// deadlines cascade to them.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::time::Duration;
///
/// use airbag::{CallContext, TraceContext};
///
/// let ctx = CallContext::background()
///     .with_timeout(Duration::from_secs(2))
///     .with_trace(TraceContext::new().with_trace_id("4bf92f3577b34da6"));
///
/// assert_eq!(ctx.trace().trace_id(), Some("4bf92f3577b34da6"));
/// assert_eq!(ctx.scope().remaining(), Some(Duration::from_secs(2)));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    scope: DeadlineScope,
    trace: TraceContext,
}

impl CallContext {
    /// A context without a deadline that is never cancelled by the caller.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `token`.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            scope: DeadlineScope::from_token(token),
            trace: TraceContext::default(),
        }
    }

    /// Narrows the context with a timeout measured from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            scope: self.scope.derive(Some(timeout)),
            trace: self.trace,
        }
    }

    /// Narrows the context with an absolute deadline.
    #[must_use]
    pub fn with_deadline(self, deadline: Instant) -> Self {
        Self {
            scope: self.scope.derive_until(Some(deadline)),
            trace: self.trace,
        }
    }

    /// Replaces the trace metadata.
    #[must_use]
    pub fn with_trace(self, trace: TraceContext) -> Self {
        Self { trace, ..self }
    }

    /// Returns the scope of the context.
    #[must_use]
    pub fn scope(&self) -> &DeadlineScope {
        &self.scope
    }

    /// Returns the trace metadata.
    #[must_use]
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Cancels the context and everything derived from it.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    pub(crate) fn with_scope(&self, scope: DeadlineScope) -> Self {
        Self {
            scope,
            trace: self.trace.clone(),
        }
    }
}

impl From<DeadlineScope> for CallContext {
    fn from(scope: DeadlineScope) -> Self {
        Self {
            scope,
            trace: TraceContext::default(),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(CallContext: Send, Sync, Clone);
        static_assertions::assert_impl_all!(TraceContext: Send, Sync, Clone);
    }

    #[test]
    fn baggage_is_copy_on_write() {
        let base = TraceContext::new().with_baggage("tenant", "contoso");
        let extended = base.clone().with_baggage("region", "westus");

        assert_eq!(base.baggage("region"), None);
        assert_eq!(extended.baggage("tenant"), Some("contoso"));
        assert_eq!(
            extended.baggage_iter().collect::<Vec<_>>(),
            vec![("region", "westus"), ("tenant", "contoso")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_narrows_only() {
        let ctx = CallContext::background()
            .with_timeout(Duration::from_millis(100))
            .with_deadline(Instant::now() + Duration::from_secs(5));

        assert_eq!(ctx.scope().remaining(), Some(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = CallContext::from_token(token.clone()).with_trace(TraceContext::new().with_trace_id("abc"));
        let nested = ctx.with_scope(ctx.scope().derive(None));

        token.cancel();

        assert!(ctx.scope().is_done());
        assert!(nested.scope().is_done());
        assert_eq!(nested.trace().trace_id(), Some("abc"));
    }
}
