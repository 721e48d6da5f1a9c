//! Resilience patterns for fault tolerance around fallible calls
//!
//! This module provides the three decorators DeskRelay services compose
//! around outbound operations:
//! - **Circuit Breaker**: stops invoking a failing dependency once
//!   consecutive failures cross a threshold, then probes for recovery
//! - **Retry Policy**: masks transient failures with exponential backoff
//! - **Rate Limiter**: bounds per-client request counts within a fixed
//!   time window
//!
//! The three are independent and composable; none performs I/O of its
//! own, and none transforms the wrapped operation's errors beyond the
//! gating variants in [`ResilienceError`]. A typical call path wraps the
//! operation first in a rate-limit check, then a retry policy, then a
//! circuit breaker.
//!
//! Each pattern instance owns its mutable state behind instance-scoped
//! locks, so concurrent calls through a shared instance are safe. State
//! is process-local: nothing here coordinates across processes.

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
pub use rate_limiter::{FixedWindowLimiter, RateLimiterConfig, RateLimiterConfigBuilder, WINDOW};
pub use retry::{RetryConfig, RetryConfigBuilder, RetryPolicy};
