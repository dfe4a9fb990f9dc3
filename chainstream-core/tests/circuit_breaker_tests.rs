//! Breaker behavior shared across concurrent callers

use chainstream_core::error::ExecutionError;
use chainstream_core::providers::{CircuitBreakerConfig, CircuitBreakerRegistry, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn breaker(threshold: u32, recovery: Duration) -> Arc<CircuitBreakerRegistry> {
    Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: threshold,
        recovery_timeout: recovery,
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let cb = breaker(1_000, Duration::from_secs(60));

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let cb = Arc::clone(&cb);
            tokio::spawn(async move {
                let _ = cb
                    .call("openai", || async {
                        Err::<(), _>(ExecutionError::provider("openai", ProviderError::Timeout))
                    })
                    .await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cb.snapshot("openai").failure_count, 64);
    assert!(!cb.snapshot("openai").is_open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_skips_the_call() {
    let cb = breaker(2, Duration::from_secs(30));
    let mut invoked = 0;

    for _ in 0..4 {
        let result = cb
            .call("anthropic", || {
                invoked += 1;
                async {
                    Err::<(), _>(ExecutionError::provider(
                        "anthropic",
                        ProviderError::ServerError {
                            status_code: 529,
                            message: "overloaded".to_string(),
                        },
                    ))
                }
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(invoked, 2);

    match cb.try_acquire("anthropic") {
        Err(ExecutionError::CircuitOpen { retry_in, .. }) => {
            assert_eq!(retry_in, Duration::from_secs(30));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }

    tokio::time::advance(Duration::from_secs(30)).await;
    let value = cb.call("anthropic", || async { Ok(7) }).await.unwrap();
    assert_eq!(value, 7);
    assert_eq!(cb.snapshot("anthropic").failure_count, 0);
    assert!(!cb.snapshot("anthropic").is_open);
}

#[tokio::test]
async fn test_success_resets_consecutive_count() {
    let cb = breaker(3, Duration::from_secs(60));
    for _ in 0..2 {
        cb.try_acquire("google").unwrap().fail();
    }
    cb.try_acquire("google").unwrap().succeed();
    for _ in 0..2 {
        cb.try_acquire("google").unwrap().fail();
    }

    let state = cb.snapshot("google");
    assert_eq!(state.failure_count, 2);
    assert!(!state.is_open);
}

#[tokio::test]
async fn test_reset_closes_circuit() {
    let cb = breaker(1, Duration::from_secs(600));
    cb.try_acquire("openai").unwrap().fail();
    assert_err!(cb.try_acquire("openai"));

    cb.reset("openai");
    let permit = assert_ok!(cb.try_acquire("openai"));
    assert!(!permit.is_probe());
    permit.succeed();
}

#[tokio::test(start_paused = true)]
async fn test_long_call_finishing_after_trip_does_not_close_circuit() {
    let cb = breaker(2, Duration::from_secs(60));
    let long_stream = cb.try_acquire("openai").unwrap();

    for _ in 0..2 {
        cb.try_acquire("openai").unwrap().fail();
    }
    assert!(cb.snapshot("openai").is_open);

    long_stream.succeed();
    let state = cb.snapshot("openai");
    assert!(state.is_open);
    assert_eq!(state.failure_count, 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    match cb.try_acquire("openai") {
        Err(ExecutionError::CircuitOpen { retry_in, .. }) => {
            assert_eq!(retry_in, Duration::from_secs(59));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }

    tokio::time::advance(Duration::from_secs(59)).await;
    let probe = assert_ok!(cb.try_acquire("openai"));
    assert!(probe.is_probe());
    probe.succeed();
    assert!(!cb.snapshot("openai").is_open);
}
