//! Integration tests for the resilience module
//!
//! Exercises the circuit breaker, retry policy, and rate limiter under
//! failure sequences, and the composed limit → retry → breaker chain a
//! service call path uses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deskrelay_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FixedWindowLimiter, MockClock,
    RateLimiterConfig, ResilienceError, RetryConfig, RetryPolicy,
};

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    message: String,
}

impl TestError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

/// Validates that any run of consecutive failures at or past the
/// threshold opens the circuit and the next call fails fast.
///
/// # Test Steps
/// 1. Configure a breaker with threshold 5
/// 2. Drive 5 consecutive failures through `execute`
/// 3. Verify the state is OPEN
/// 4. Verify the next call returns `CircuitOpen` without invoking the
///    operation
#[tokio::test]
async fn breaker_opens_at_threshold_and_fails_fast() {
    let cb = CircuitBreaker::new(CircuitBreakerConfig::default()).expect("valid config");
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let invocations = Arc::clone(&invocations);
        let result = cb
            .execute(|| async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::new("backend down"))
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    }
    assert_eq!(cb.state(), CircuitState::Open);

    let invocations_after_open = Arc::clone(&invocations);
    let result = cb
        .execute(|| async move {
            invocations_after_open.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
    assert_eq!(invocations.load(Ordering::SeqCst), 5, "no invocation while open");
}

/// Validates the full recovery cycle: after the recovery timeout a
/// single probe runs; success closes the circuit and resets the failure
/// count, failure reopens it.
#[tokio::test]
async fn breaker_recovery_probe_cycle() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .recovery_timeout(Duration::from_secs(60))
        .build()
        .expect("valid config");
    let cb = CircuitBreaker::with_clock(config, clock.clone()).expect("breaker");

    // Open the circuit.
    for _ in 0..2 {
        let _ = cb.execute(|| async { Err::<(), _>(TestError::new("down")) }).await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // Probe fails: back to OPEN with a refreshed timestamp.
    clock.advance(Duration::from_secs(61));
    let result = cb.execute(|| async { Err::<(), _>(TestError::new("still down")) }).await;
    assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    assert_eq!(cb.state(), CircuitState::Open);

    // Probe succeeds: CLOSED, failure count reset.
    clock.advance(Duration::from_secs(61));
    let result = cb.execute(|| async { Ok::<_, TestError>("back") }).await;
    assert_eq!(result.expect("probe should pass through"), "back");
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.metrics().failure_count, 0);
}

/// Validates the retry schedule: an operation failing twice then
/// succeeding completes after exactly two backoff waits of base and
/// 2 * base.
#[tokio::test]
async fn retry_backoff_schedule() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let policy = RetryPolicy::new(
        RetryConfig::builder()
            .max_retries(3)
            .base_delay(Duration::from_millis(20))
            .build()
            .expect("valid config"),
    )
    .expect("policy");

    let start = Instant::now();
    let result = policy
        .execute(|| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError::new("transient"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

    assert_eq!(result.expect("third attempt succeeds"), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // Waits were 20ms then 40ms; a third wait (80ms) must not happen.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(60), "two backoff waits expected, got {elapsed:?}");
}

/// Validates exhaustion: an always-failing operation runs exactly
/// `max_retries + 1` times and the last error is surfaced.
#[tokio::test]
async fn retry_exhaustion_attempt_count() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let policy = RetryPolicy::new(
        RetryConfig::builder()
            .max_retries(3)
            .base_delay(Duration::from_millis(5))
            .build()
            .expect("valid config"),
    )
    .expect("policy");

    let result: Result<(), _> = policy
        .execute(|| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError::new("permanent"))
            }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4, "1 initial + 3 retries, then stop");
    match result {
        Err(ResilienceError::RetriesExhausted { attempts: reported, source }) => {
            assert_eq!(reported, 4);
            assert_eq!(source.to_string(), "permanent");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

/// Validates the quota boundary and window reset for a single client:
/// request 100 allowed, 101 denied, allowed again after expiry.
#[test]
fn rate_limiter_quota_and_window_reset() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::builder().max_requests(100).build().expect("valid config");
    let limiter = FixedWindowLimiter::with_clock(config, clock.clone()).expect("limiter");

    for n in 1..=100 {
        assert!(limiter.try_acquire("customer-7"), "request {n} should be allowed");
    }
    assert!(!limiter.try_acquire("customer-7"), "101st request must be denied");

    clock.advance(Duration::from_secs(61));
    assert!(limiter.try_acquire("customer-7"), "window expiry must readmit the client");
}

/// Validates the composed call path from the service layer: rate-limit
/// check, then retry, then circuit breaker around the operation.
#[tokio::test]
async fn composed_limit_retry_breaker_chain() {
    let limiter = FixedWindowLimiter::new(
        RateLimiterConfig::builder().max_requests(2).build().expect("valid config"),
    )
    .expect("limiter");
    let policy = RetryPolicy::new(
        RetryConfig::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(5))
            .build()
            .expect("valid config"),
    )
    .expect("policy");
    let cb = CircuitBreaker::with_defaults();

    let attempts = Arc::new(AtomicU32::new(0));

    // Fallible call: first attempt fails, second succeeds; the retry
    // layer masks the transient failure, the breaker records both
    // outcomes.
    let run = |client: &str| {
        let limiter = limiter.clone();
        let policy = policy.clone();
        let cb = cb.clone();
        let attempts = Arc::clone(&attempts);
        let client = client.to_string();
        async move {
            limiter.check::<TestError>(&client)?;
            policy
                .execute(|| {
                    let cb = cb.clone();
                    let attempts = Arc::clone(&attempts);
                    async move {
                        cb.execute(|| async {
                            let n = attempts.fetch_add(1, Ordering::SeqCst);
                            if n == 0 {
                                Err(TestError::new("flaky"))
                            } else {
                                Ok("answer")
                            }
                        })
                        .await
                    }
                })
                .await
                .map_err(flatten_nested)
        }
    };

    let result = run("client-a").await;
    assert_eq!(result.expect("retry should mask the transient failure"), "answer");
    assert_eq!(cb.state(), CircuitState::Closed);

    // Second request consumes the remaining quota, third is rejected
    // before any of the inner layers run.
    let attempts_before = attempts.load(Ordering::SeqCst);
    let _ = run("client-a").await;
    let rejected = run("client-a").await;
    assert!(matches!(rejected, Err(ResilienceError::RateLimitExceeded { .. })));
    assert!(attempts.load(Ordering::SeqCst) >= attempts_before);
}

/// Collapse `ResilienceError<ResilienceError<TestError>>` from the
/// nested retry-over-breaker composition into the inner error.
fn flatten_nested(
    err: ResilienceError<ResilienceError<TestError>>,
) -> ResilienceError<TestError> {
    match err {
        ResilienceError::RetriesExhausted { attempts, source } => match source {
            ResilienceError::OperationFailed { source } => {
                ResilienceError::RetriesExhausted { attempts, source }
            }
            other => other,
        },
        ResilienceError::Cancelled => ResilienceError::Cancelled,
        ResilienceError::CircuitOpen => ResilienceError::CircuitOpen,
        ResilienceError::RateLimitExceeded { client_id, max_requests, window } => {
            ResilienceError::RateLimitExceeded { client_id, max_requests, window }
        }
        ResilienceError::OperationFailed { source } => match source {
            ResilienceError::OperationFailed { source } => {
                ResilienceError::OperationFailed { source }
            }
            other => other,
        },
    }
}
