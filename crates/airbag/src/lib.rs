// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient calls to remote dependencies.
//!
//! This crate guards outbound calls of a service with the classic resilience patterns, composed
//! in a fixed order and configured per dependency:
//!
//! - a **circuit breaker** that stops calling a dependency that keeps failing,
//! - a **bulkhead** that bounds the number of concurrent attempts per dependency,
//! - a **deadline scope** that combines the caller's deadline and cancellation with local
//!   attempt and call timeouts,
//! - a **retry policy** with exponential backoff and jitter that never retries past the deadline,
//! - a **completion guard** that reports every attempt exactly once even when the operation and
//!   its deadline race,
//! - a **shutdown coordinator** that refuses new calls on shutdown and drains the running ones
//!   within a grace period.
//!
//! # Core Types
//!
//! - [`Registry`]: the set of [`Dependency`] instances, built once from [`DependencyConfig`]s.
//! - [`CallExecutor`]: runs a caller-supplied operation against a dependency.
//! - [`CallContext`]: the caller's deadline, cancellation and trace metadata.
//! - [`CallError`]: why a call failed, always keeping the operation's own error.
//! - [`Classify`]: tells the core whether an error counts against the dependency and, through
//!   [`RecoveryInfo`], whether it is transient.
//! - [`ShutdownCoordinator`]: the lifecycle hook of the process manager.
//!
//! # Quick Start
//!
//! ```
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//!
//! use airbag::{CallContext, CallError, CallExecutor, DependencyConfig, ErrorKind, Registry};
//!
//! let registry = Registry::builder()
//!     .dependency(
//!         "auth-service",
//!         DependencyConfig::default()
//!             .failure_threshold(3)
//!             .open_duration(Duration::from_secs(30))
//!             .max_concurrent(16)
//!             .max_attempts(3),
//!     )
//!     .build()?;
//!
//! let executor = CallExecutor::new(registry);
//! let ctx = CallContext::background().with_timeout(Duration::from_secs(2));
//!
//! let result = executor
//!     .invoke(&ctx, "auth-service", |ctx| async move {
//!         // Perform the remote call here, observing `ctx.scope()` for cancellation.
//!         let _ = ctx;
//!         Err::<String, _>(ErrorKind::Unavailable)
//!     })
//!     .await;
//!
//! match result {
//!     Err(CallError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//!
//! // Drain on shutdown.
//! executor.coordinator().shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Runtime
//!
//! The crate runs on Tokio. Each attempt's operation is spawned as its own task, so the caller
//! can stop waiting for an operation that ignores its scope; such an operation keeps its bulkhead
//! permit until it finishes, and its late result is discarded.
//!
//! # Features
//!
//! - `logs`: emits structured `tracing` events for breaker transitions, retries, timeouts,
//!   bulkhead rejections and shutdown. Enable per registry with `RegistryBuilder::enable_logs`.
//!   Event and attribute names are listed in [`telemetry`].
//! - `serde`: derives `Serialize` and `Deserialize` for [`DependencyConfig`].

pub mod breaker;
pub mod bulkhead;
mod classify;
mod completion;
mod config;
mod context;
mod dependency;
mod error;
mod executor;
pub mod hooks;
mod registry;
pub mod retry;
mod rnd;
mod scope;
mod shutdown;
pub mod telemetry;
mod utils;

pub use breaker::CircuitState;
pub use classify::{Classify, ErrorKind};
pub use completion::{Completion, CompletionGuard};
pub use config::DependencyConfig;
pub use context::{CallContext, TraceContext};
pub use dependency::Dependency;
pub use error::{AttemptError, CallError, ConfigError, ShutdownError};
pub use executor::{CallExecutor, CallRequest};
pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};
pub use registry::{Registry, RegistryBuilder};
pub use scope::{DeadlineScope, DoneReason};
pub use shutdown::ShutdownCoordinator;
