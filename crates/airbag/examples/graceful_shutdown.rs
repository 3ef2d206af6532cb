// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drains in-flight calls on shutdown:
//!
//! 1. A few calls of different length are started against a dependency
//! 2. Shutdown is requested with a grace period; new calls are refused from now on
//! 3. Calls that finish within the grace period complete normally
//! 4. The remaining calls are cancelled when the grace period elapses

use std::time::Duration;

use airbag::{CallContext, CallExecutor, DependencyConfig, ErrorKind, Registry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let registry = Registry::builder()
        .dependency("billing", DependencyConfig::default())
        .enable_logs()
        .build()?;
    let executor = CallExecutor::new(registry);

    let calls: Vec<_> = [1, 3, 60]
        .into_iter()
        .map(|secs| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let result = executor
                    .invoke(&CallContext::background(), "billing", move |ctx| async move {
                        // A cooperative operation would also watch `ctx.scope().done()`.
                        let _ = ctx;
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                        Ok::<_, ErrorKind>(secs)
                    })
                    .await;
                (secs, result)
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("{} call(s) in flight, shutting down", executor.coordinator().in_flight());

    let shutdown = {
        let coordinator = executor.coordinator().clone();
        tokio::spawn(async move { coordinator.shutdown(GRACE).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    match executor
        .invoke(&CallContext::background(), "billing", |_ctx| async { Ok::<_, ErrorKind>(0) })
        .await
    {
        Ok(_) => println!("late call unexpectedly admitted"),
        Err(e) => println!("late call refused: {e}"),
    }

    for call in calls {
        match call.await? {
            (secs, Ok(_)) => println!("{secs}s call completed"),
            (secs, Err(e)) => println!("{secs}s call failed: {e}"),
        }
    }

    match shutdown.await? {
        Ok(()) => println!("drained cleanly"),
        Err(e) => println!("drained: {e}"),
    }

    Ok(())
}
