// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Calls a flaky dependency through the executor and shows the resilience events:
//!
//! 1. Transient failures are retried with exponential backoff
//! 2. Consecutive failures open the circuit and further calls are rejected
//! 3. After the open period a probe is let through to test the dependency
//! 4. The circuit closes once the probe succeeds

use std::time::Duration;

use airbag::{CallContext, CallExecutor, DependencyConfig, ErrorKind, Registry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing subscriber for logs to console
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let registry = Registry::builder()
        .dependency(
            "inventory",
            DependencyConfig::default()
                // Decrease the following values to see the circuit trip faster
                .failure_threshold(4)
                .open_duration(Duration::from_millis(500))
                .max_attempts(2)
                .base_delay(Duration::from_millis(20))
                .attempt_timeout(Duration::from_millis(200)),
        )
        .on_state_change(|args| println!("circuit of '{}' changed: {} -> {}", args.dependency(), args.from(), args.to()))
        .enable_logs()
        .build()?;

    let executor = CallExecutor::new(registry).on_call_completed(|args| {
        println!(
            "call to '{}' finished: {} after {} attempt(s) in {:?}",
            args.dependency(),
            args.status(),
            args.attempts(),
            args.latency()
        );
    });

    for input in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx = CallContext::background().with_timeout(Duration::from_secs(1));
        match executor.invoke(&ctx, "inventory", |_ctx| execute_operation(input)).await {
            Ok(output) => println!("{input}: {output}"),
            Err(e) => println!("{input}: {e}"),
        }
    }

    Ok(())
}

// Simulates an outage: 60% of the calls fail until input 25, then the dependency recovers.
async fn execute_operation(input: u32) -> Result<String, ErrorKind> {
    if input > 25 {
        return Ok(format!("stock-{input}"));
    }

    if fastrand::u8(0..10) < 6 {
        Err(ErrorKind::Unavailable)
    } else {
        Ok(format!("stock-{input}"))
    }
}
