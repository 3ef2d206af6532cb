// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for bulkhead isolation using only public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airbag::{CallContext, CallError, CallExecutor, DependencyConfig, ErrorKind, Registry};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_never_exceed_max_concurrent() {
    const MAX_CONCURRENT: usize = 4;

    let registry = Registry::builder()
        .dependency("payments", DependencyConfig::default().max_concurrent(MAX_CONCURRENT))
        .build()
        .unwrap();
    let executor = CallExecutor::new(registry);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls: Vec<_> = (0..64)
        .map(|_| {
            let executor = executor.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);

            tokio::spawn(async move {
                executor
                    .invoke(&CallContext::background(), "payments", move |_| {
                        let running = Arc::clone(&running);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, ErrorKind>(())
                        }
                    })
                    .await
            })
        })
        .collect();

    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT);
    assert_eq!(executor.registry().get("payments").unwrap().bulkhead().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn bounded_wait_times_out() {
    let registry = Registry::builder()
        .dependency(
            "payments",
            DependencyConfig::default()
                .max_concurrent(1)
                .max_wait(Duration::from_millis(100)),
        )
        .build()
        .unwrap();
    let executor = CallExecutor::new(registry);

    let slow = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .invoke(&CallContext::background(), "payments", |_| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, ErrorKind>(())
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;

    let error = executor
        .invoke(&CallContext::background(), "payments", |_| async { Ok::<_, ErrorKind>(()) })
        .await
        .unwrap_err();

    assert!(error.is_timeout());
    assert!(matches!(
        error,
        CallError::BulkheadTimeout { waited, .. } if waited == Duration::from_millis(100)
    ));

    slow.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn caller_deadline_bounds_the_wait() {
    let registry = Registry::builder()
        .dependency("payments", DependencyConfig::default().max_concurrent(1))
        .build()
        .unwrap();
    let executor = CallExecutor::new(registry);
    let _held = executor.registry().get("payments").unwrap().bulkhead().try_acquire().unwrap();

    let context = CallContext::background().with_timeout(Duration::from_millis(250));
    let error = executor
        .invoke(&context, "payments", |_| async { Ok::<_, ErrorKind>(()) })
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CallError::BulkheadTimeout { waited, .. } if waited == Duration::from_millis(250)
    ));
}

#[tokio::test(start_paused = true)]
async fn saturated_dependency_does_not_block_others() {
    let registry = Registry::builder()
        .dependency("payments", DependencyConfig::default().max_concurrent(1).max_wait(Duration::ZERO))
        .dependency("catalog", DependencyConfig::default().max_concurrent(1))
        .build()
        .unwrap();
    let executor = CallExecutor::new(registry);
    let _held = executor.registry().get("payments").unwrap().bulkhead().try_acquire().unwrap();

    let error = executor
        .invoke(&CallContext::background(), "payments", |_| async { Ok::<_, ErrorKind>(()) })
        .await
        .unwrap_err();
    assert!(matches!(error, CallError::BulkheadFull { .. }));

    let value = executor
        .invoke(&CallContext::background(), "catalog", |_| async { Ok::<_, ErrorKind>("shelf") })
        .await
        .unwrap();
    assert_eq!(value, "shelf");

    // A bulkhead rejection is not a verdict about the dependency.
    assert_eq!(executor.registry().get("payments").unwrap().consecutive_failures(), 0);
}
