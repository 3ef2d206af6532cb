// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::bulkhead::{BulkheadError, BulkheadPermit};
use crate::dependency::Admission;
use crate::hooks::{CallCompletedArgs, CallStatus, OnCallCompleted};
use crate::retry::{Attempt, RetryDecision, RetryPolicy, StopReason};
use crate::{
    AttemptError, CallContext, CallError, Classify, CompletionGuard, DeadlineScope, Dependency, DoneReason, Registry,
    ShutdownCoordinator,
};

/// A single logical call to a dependency, possibly made of several attempts.
///
/// `operation` is invoked once per attempt with a [`CallContext`] whose scope is done when the
/// attempt times out, the request deadline passes, the caller cancels, or shutdown forces the
/// call to stop. Operations are expected to observe the scope; the executor stops waiting for
/// them either way.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::retry::RetryPolicy;
/// use airbag::{CallContext, CallRequest, ErrorKind};
///
/// let request = CallRequest::new("inventory", |_ctx: CallContext| async { Ok::<_, ErrorKind>(42) })
///     .context(CallContext::background().with_timeout(Duration::from_secs(2)))
///     .retry_policy(RetryPolicy::new().max_attempts(5));
/// # let _ = request;
/// ```
#[derive(Debug)]
pub struct CallRequest<F> {
    dependency: Arc<str>,
    operation: F,
    context: CallContext,
    retry_policy: Option<RetryPolicy>,
}

impl<F> CallRequest<F> {
    /// Creates a request for `dependency` with a background context.
    #[must_use]
    pub fn new(dependency: impl Into<Arc<str>>, operation: F) -> Self {
        Self {
            dependency: dependency.into(),
            operation,
            context: CallContext::background(),
            retry_policy: None,
        }
    }

    /// Sets the caller's context: deadline, cancellation and trace metadata.
    #[must_use]
    pub fn context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Overrides the retry policy of the dependency for this request only.
    #[must_use]
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }
}

/// Runs calls against registered dependencies.
///
/// For every request the executor:
///
/// 1. Refuses the call if the process is shutting down.
/// 2. Asks the circuit breaker of the dependency for admission.
/// 3. Acquires a bulkhead permit, waiting no longer than the request scope allows.
/// 4. Runs the operation under a scope that combines the caller's deadline with the configured
///    attempt and call timeouts. The first of {operation finishes, scope done} decides the
///    attempt; a result that arrives later is discarded.
/// 5. Reports the attempt to the breaker and retries retryable failures with exponential
///    backoff, as long as the next attempt would still start before the deadline.
///
/// The executor is cheap to clone and is typically shared by the whole process.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use airbag::{CallContext, CallExecutor, DependencyConfig, ErrorKind, Registry};
///
/// let registry = Registry::builder()
///     .dependency("auth-service", DependencyConfig::default())
///     .build()?;
/// let executor = CallExecutor::new(registry);
///
/// let token = executor
///     .invoke(&CallContext::background(), "auth-service", |_ctx| async {
///         Ok::<_, ErrorKind>("token")
///     })
///     .await?;
///
/// assert_eq!(token, "token");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CallExecutor {
    registry: Arc<Registry>,
    coordinator: ShutdownCoordinator,
    on_call_completed: Option<OnCallCompleted>,
}

enum Outcome<T, E> {
    Finished(Result<T, E>),
    TimedOut,
    Interrupted(DoneReason),
}

impl CallExecutor {
    /// Creates an executor over `registry` with its own shutdown coordinator.
    #[must_use]
    pub fn new(registry: impl Into<Arc<Registry>>) -> Self {
        let registry = registry.into();
        let coordinator = ShutdownCoordinator::new().with_logs(registry.logs_enabled());

        Self {
            registry,
            coordinator,
            on_call_completed: None,
        }
    }

    /// Uses a coordinator shared with other executors or owned by the process manager.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Subscribes to the final outcome of every request addressed to a registered dependency.
    ///
    /// The hook runs exactly once per request, after the outcome is decided and before it is
    /// returned to the caller.
    #[must_use]
    pub fn on_call_completed<F>(mut self, hook: F) -> Self
    where
        F: Fn(CallCompletedArgs) + Send + Sync + 'static,
    {
        self.on_call_completed = Some(OnCallCompleted::new(hook));
        self
    }

    /// The shutdown coordinator that admits the calls of this executor.
    #[must_use]
    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// The registry of dependencies.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Calls `dependency` with `operation` under the caller's context.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] when the call is refused, interrupted or fails. Failures of the
    /// operation are wrapped, never replaced.
    pub async fn invoke<T, E, F, Fut>(&self, context: &CallContext, dependency: &str, operation: F) -> Result<T, CallError<E>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Classify + Send + 'static,
    {
        self.execute(CallRequest::new(dependency, operation).context(context.clone())).await
    }

    /// Executes a prepared [`CallRequest`].
    ///
    /// # Errors
    ///
    /// Same as [`invoke`][Self::invoke].
    pub async fn execute<T, E, F, Fut>(&self, request: CallRequest<F>) -> Result<T, CallError<E>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Classify + Send + 'static,
    {
        let CallRequest {
            dependency: name,
            mut operation,
            context,
            retry_policy,
        } = request;

        let Some(dependency) = self.registry.get(&name) else {
            return Err(CallError::UnknownDependency { dependency: name });
        };

        let started = Instant::now();
        let mut attempts = 0;
        let policy = retry_policy.as_ref().unwrap_or_else(|| dependency.retry_policy());

        let result = self
            .run(dependency, &context, policy, &mut operation, &mut attempts)
            .await;

        self.report_completed(dependency, &result, attempts, started.elapsed(), &context);
        result
    }

    async fn run<T, E, F, Fut>(
        &self,
        dependency: &Dependency,
        context: &CallContext,
        policy: &RetryPolicy,
        operation: &mut F,
        made: &mut u32,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Classify + Send + 'static,
    {
        let name = dependency.name_arc();
        let config = dependency.config();
        let scope = context.scope().derive(config.get_call_timeout());

        let Some(_in_flight) = self.coordinator.admit(scope.token().clone()) else {
            return Err(CallError::ShuttingDown {
                dependency: Arc::clone(name),
            });
        };

        // Stops operations still running in the background, also when the caller drops the call.
        let _cancel_on_exit = scope.token().clone().drop_guard();

        let mut attempt = Attempt::first(policy.get_max_attempts());

        let result = loop {
            if let Some(reason) = scope.reason() {
                break Err(self.interrupted(name, reason, context));
            }

            let Some(admission) = dependency.enter() else {
                break Err(CallError::CircuitOpen {
                    dependency: Arc::clone(name),
                });
            };

            let permit = match dependency.bulkhead().acquire(&scope).await {
                Ok(permit) => permit,
                Err(error) => {
                    drop(admission);
                    self.emit_bulkhead_rejected_log(dependency, error, context);
                    break Err(self.bulkhead_error(name, error, context));
                }
            };

            let attempt_scope = scope.derive(config.get_attempt_timeout());
            *made += 1;

            let future = operation(context.with_scope(attempt_scope.clone()));
            let outcome = self.run_attempt(dependency, future, permit, &attempt_scope, &scope).await;

            // Tell an abandoned operation to stop; a finished one does not care.
            attempt_scope.cancel();

            let error = match outcome {
                Outcome::Finished(Ok(value)) => {
                    admission.success();
                    break Ok(value);
                }
                Outcome::Finished(Err(error)) => AttemptError::Operation(error),
                Outcome::TimedOut => {
                    let timeout = config.get_attempt_timeout().unwrap_or_default();
                    self.emit_attempt_timeout_log(dependency, attempt, timeout, context);
                    AttemptError::TimedOut { timeout }
                }
                Outcome::Interrupted(reason) => {
                    drop(admission);
                    break Err(self.interrupted(name, reason, context));
                }
            };

            let decision = policy.should_retry(attempt, &error, scope.remaining());
            Self::record_verdict(dependency, admission, &error, matches!(decision, RetryDecision::Stop(_)));

            match decision {
                RetryDecision::Retry { delay, next } => {
                    self.emit_retry_log(dependency, attempt, delay, &error, context);

                    if let Err(reason) = scope.run(tokio::time::sleep(delay)).await {
                        break Err(self.interrupted(name, reason, context));
                    }

                    attempt = next;
                }
                RetryDecision::Stop(StopReason::NonRetryable) => {
                    break Err(match error {
                        AttemptError::Operation(source) => CallError::NonRetryable {
                            dependency: Arc::clone(name),
                            source,
                        },
                        source @ AttemptError::TimedOut { .. } => CallError::RetriesExhausted {
                            dependency: Arc::clone(name),
                            attempts: *made,
                            source,
                        },
                    });
                }
                RetryDecision::Stop(_) => {
                    break Err(CallError::RetriesExhausted {
                        dependency: Arc::clone(name),
                        attempts: *made,
                        source: error,
                    });
                }
            }
        };

        result
    }

    async fn run_attempt<T, E, Fut>(
        &self,
        dependency: &Dependency,
        future: Fut,
        permit: BulkheadPermit,
        attempt_scope: &DeadlineScope,
        scope: &DeadlineScope,
    ) -> Outcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (guard, completion) = CompletionGuard::new();

        let mut task = {
            let guard = guard.clone();
            let name = Arc::clone(dependency.name_arc());
            let logs_enabled = self.registry.logs_enabled();

            tokio::spawn(async move {
                let result = future.await;
                // The permit belongs to the running operation, not to the caller's wait.
                drop(permit);

                if !guard.complete(Outcome::Finished(result)) {
                    emit_late_result_log(&name, logs_enabled);
                }
            })
        };

        let watch = async {
            tokio::select! {
                biased;
                joined = &mut task => {
                    if let Err(error) = joined {
                        if error.is_panic() {
                            std::panic::resume_unwind(error.into_panic());
                        }

                        guard.complete(Outcome::Interrupted(DoneReason::Cancelled));
                    }
                }
                _ = attempt_scope.done() => {
                    let outcome = scope.reason().map_or(Outcome::TimedOut, Outcome::Interrupted);
                    guard.complete(outcome);
                }
            }
        };

        let ((), outcome) = tokio::join!(watch, completion.wait());
        outcome
    }

    fn record_verdict<E: Classify>(dependency: &Dependency, admission: Admission<'_>, error: &AttemptError<E>, is_final: bool) {
        if !error.kind().is_dependency_failure() {
            // The dependency answered; the request itself was wrong.
            admission.success();
        } else if is_final || dependency.config().counts_intermediate_failures() {
            admission.failure();
        }
    }

    // A cancelled request scope is blamed on shutdown only when the caller's own context is
    // still live.
    fn interrupted<E>(&self, name: &Arc<str>, reason: DoneReason, context: &CallContext) -> CallError<E> {
        let dependency = Arc::clone(name);

        match (reason, context.scope().reason()) {
            (DoneReason::DeadlineExceeded, _) | (DoneReason::Cancelled, Some(DoneReason::DeadlineExceeded)) => {
                CallError::DeadlineExceeded { dependency }
            }
            (DoneReason::Cancelled, None) if self.coordinator.is_forced() => CallError::ShuttingDown { dependency },
            (DoneReason::Cancelled, _) => CallError::Cancelled { dependency },
        }
    }

    fn bulkhead_error<E>(&self, name: &Arc<str>, error: BulkheadError, context: &CallContext) -> CallError<E> {
        let dependency = Arc::clone(name);

        match error {
            BulkheadError::Full => CallError::BulkheadFull { dependency },
            BulkheadError::Timeout { waited }
            | BulkheadError::Interrupted {
                reason: DoneReason::DeadlineExceeded,
                waited,
            } => CallError::BulkheadTimeout { dependency, waited },
            BulkheadError::Interrupted {
                reason: DoneReason::Cancelled,
                ..
            } => self.interrupted(name, DoneReason::Cancelled, context),
        }
    }

    fn report_completed<T, E: Classify>(
        &self,
        dependency: &Dependency,
        result: &Result<T, CallError<E>>,
        attempts: u32,
        latency: Duration,
        context: &CallContext,
    ) {
        let Some(hook) = &self.on_call_completed else {
            return;
        };

        let status = match result {
            Ok(_) => CallStatus::Success,
            Err(error) => CallStatus::Failed {
                label: error.as_label(),
                kind: error.kind(),
            },
        };

        hook.call(CallCompletedArgs {
            dependency: Arc::clone(dependency.name_arc()),
            status,
            attempts,
            latency,
            trace: context.trace().clone(),
        });
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_retry_log<E: Classify>(
        &self,
        dependency: &Dependency,
        attempt: Attempt,
        delay: Duration,
        error: &AttemptError<E>,
        context: &CallContext,
    ) {
        #[cfg(any(feature = "logs", test))]
        if self.registry.logs_enabled() {
            tracing::event!(
                name: crate::telemetry::RETRY_EVENT,
                tracing::Level::WARN,
                dependency.name = dependency.name(),
                retry.attempt.index = attempt.index(),
                retry.attempt.is_last = attempt.is_last(),
                retry.delay = delay.as_secs_f32(),
                error.kind = error.kind().as_str(),
                trace.id = context.trace().trace_id(),
            );
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_attempt_timeout_log(&self, dependency: &Dependency, attempt: Attempt, timeout: Duration, context: &CallContext) {
        #[cfg(any(feature = "logs", test))]
        if self.registry.logs_enabled() {
            tracing::event!(
                name: crate::telemetry::ATTEMPT_TIMEOUT_EVENT,
                tracing::Level::WARN,
                dependency.name = dependency.name(),
                retry.attempt.index = attempt.index(),
                timeout.duration = timeout.as_secs_f32(),
                trace.id = context.trace().trace_id(),
            );
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when logs feature not used")
    )]
    fn emit_bulkhead_rejected_log(&self, dependency: &Dependency, error: BulkheadError, context: &CallContext) {
        #[cfg(any(feature = "logs", test))]
        if self.registry.logs_enabled() {
            tracing::event!(
                name: crate::telemetry::BULKHEAD_REJECTED_EVENT,
                tracing::Level::WARN,
                dependency.name = dependency.name(),
                bulkhead.max_concurrent = dependency.bulkhead().max_concurrent(),
                bulkhead.error = %error,
                trace.id = context.trace().trace_id(),
            );
        }
    }
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
fn emit_late_result_log(dependency: &str, logs_enabled: bool) {
    #[cfg(any(feature = "logs", test))]
    if logs_enabled {
        tracing::event!(
            name: crate::telemetry::ATTEMPT_LATE_RESULT_EVENT,
            tracing::Level::DEBUG,
            dependency.name = dependency,
        );
    }
}
