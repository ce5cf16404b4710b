//! Breakers shared across concurrent tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use resilience::{BreakerConfig, BreakerRegistry, BreakerState, GuardedOutcome};

fn registry() -> Arc<BreakerRegistry> {
    Arc::new(BreakerRegistry::new(BreakerConfig {
        failure_threshold: 5,
        failure_window: Duration::from_secs(60),
        cool_down: Duration::from_secs(30),
        half_open_successes: 1,
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_open_breaker_once() {
    let registry = registry();
    let attempts = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let caller = registry.caller("catalog.write");
        let attempts = attempts.clone();
        handles.push(tokio::spawn(async move {
            caller
                .call(
                    || async { true },
                    || async {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("connection refused")
                    },
                    || (),
                )
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if let GuardedOutcome::Rejected(()) = handle.await.unwrap() {
            rejected += 1;
        }
    }

    assert_eq!(registry.breaker("catalog.write").state(), BreakerState::Open);
    assert_eq!(attempts.load(Ordering::SeqCst) + rejected, 50);
    assert!(attempts.load(Ordering::SeqCst) >= 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_half_open_admits_single_probe_under_contention() {
    let registry = registry();
    let breaker = registry.breaker("rating.read");
    let opened = Instant::now();
    for _ in 0..5 {
        breaker.record_failure_at(opened);
    }

    let probe_time = opened + Duration::from_secs(30);
    let mut handles = Vec::new();
    for _ in 0..32 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move { breaker.admit_at(probe_time) }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
}
