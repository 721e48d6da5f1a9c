//! Retry with exponential backoff for transient failures
//!
//! Wraps an async fallible operation and reattempts it with a
//! geometrically growing delay: `base_delay * 2^attempt`. The first
//! attempt runs immediately; a delay only precedes retries. The policy
//! never swallows failures — when the attempt budget is exhausted the
//! last-observed error is surfaced inside
//! [`ResilienceError::RetriesExhausted`].
//!
//! Backoff waits are cooperative suspensions (`tokio::time::sleep`), so
//! unrelated tasks keep running. [`RetryPolicy::execute_cancellable`]
//! additionally aborts a pending wait when a [`CancellationToken`] fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt
    /// (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay before the first retry; doubles with each further retry
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::Invalid {
                message: "base_delay must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Backoff delay preceding the retry of the given 0-based failed
    /// attempt index.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Saturate rather than overflow for absurd attempt counts.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Retry policy over an injected async operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { config: RetryConfig::default() }
    }
}

impl RetryPolicy {
    /// Create a retry policy from a validated configuration
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation, retrying with exponential backoff
    ///
    /// Returns the first successful result. After `max_retries + 1`
    /// failed attempts the last failure is returned inside
    /// [`ResilienceError::RetriesExhausted`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(operation, None).await
    }

    /// Execute with a cancellation signal
    ///
    /// Identical to [`execute`](Self::execute), except a pending backoff
    /// wait is aborted with [`ResilienceError::Cancelled`] when the
    /// token fires. A token cancelled mid-operation takes effect at the
    /// next wait; in-flight attempts are not interrupted.
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(operation, Some(cancel)).await
    }

    async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let total_attempts = self.config.max_retries + 1;

        for attempt in 0..total_attempts {
            debug!(attempt = attempt + 1, total_attempts, "executing operation");

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt + 1 == total_attempts {
                        warn!(attempts = total_attempts, error = %error, "all retry attempts failed");
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: total_attempts,
                            source: error,
                        });
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        ?delay,
                        error = %error,
                        "attempt failed, retrying after backoff"
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => {
                                    debug!("retry wait aborted by cancellation");
                                    return Err(ResilienceError::Cancelled);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }

        unreachable!("retry loop always returns within the attempt budget")
    }
}
