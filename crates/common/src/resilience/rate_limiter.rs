//! Per-client fixed-window rate limiting
//!
//! Tracks request counts per client id inside a single shared window of
//! fixed length (60 seconds). When the window ages out, the whole table
//! is cleared and the window restarts at the current instant — every
//! client's count resets together, not per-client. A denied request does
//! not increment the client's count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError};

/// Fixed window length shared by all clients
pub const WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the fixed-window rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per client within one window
    pub max_requests: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_requests: 100 }
    }
}

impl RateLimiterConfig {
    /// Create a configuration builder
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid {
                message: "max_requests must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RateLimiterConfig`]
#[derive(Debug)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    pub fn new() -> Self {
        Self { config: RateLimiterConfig::default() }
    }

    pub fn max_requests(mut self, max: u32) -> Self {
        self.config.max_requests = max;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

struct WindowState {
    started_at: Instant,
    counts: HashMap<String, u32>,
}

/// Fixed-window rate limiter keyed by client id
///
/// Internal state is guarded by a single mutex scoped to the instance,
/// so concurrent calls through a shared limiter are safe. State is
/// process-local; nothing is coordinated across instances.
pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    window: Arc<Mutex<WindowState>>,
    clock: Arc<C>,
}

impl FixedWindowLimiter<SystemClock> {
    /// Create a new limiter with the system clock
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default()).expect("Default config should be valid")
    }
}

impl Default for FixedWindowLimiter<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Create a new limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            window: Arc::new(Mutex::new(WindowState {
                started_at: clock.now(),
                counts: HashMap::new(),
            })),
            clock: Arc::new(clock),
        })
    }

    /// Check whether the client may issue a request in the current
    /// window, counting it if allowed
    ///
    /// Returns `true` (and increments the client's count) when under
    /// quota, `false` (without incrementing) once the quota is reached.
    pub fn try_acquire(&self, client_id: &str) -> bool {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter window lock poisoned");
                poisoned.into_inner()
            }
        };

        let now = self.clock.now();
        // Expiry clears every client's count, not just this client's.
        if now.duration_since(window.started_at) > WINDOW {
            debug!("rate limit window expired, clearing all client counts");
            window.counts.clear();
            window.started_at = now;
        }

        let count = window.counts.get(client_id).copied().unwrap_or(0);
        if count >= self.config.max_requests {
            debug!(client_id, count, max = self.config.max_requests, "rate limit exceeded");
            return false;
        }

        window.counts.insert(client_id.to_string(), count + 1);
        true
    }

    /// Like [`try_acquire`](Self::try_acquire), but maps a denial to
    /// [`ResilienceError::RateLimitExceeded`]
    pub fn check<E>(&self, client_id: &str) -> Result<(), ResilienceError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if self.try_acquire(client_id) {
            Ok(())
        } else {
            Err(ResilienceError::RateLimitExceeded {
                client_id: client_id.to_string(),
                max_requests: self.config.max_requests,
                window: WINDOW,
            })
        }
    }

    /// Requests the client has left in the current window
    ///
    /// Does not count as a request and does not trigger window expiry.
    pub fn remaining(&self, client_id: &str) -> u32 {
        let window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter window lock poisoned");
                poisoned.into_inner()
            }
        };

        let count = window.counts.get(client_id).copied().unwrap_or(0);
        self.config.max_requests.saturating_sub(count)
    }

    /// Clear all counts and restart the window at the current instant
    pub fn reset(&self) {
        if let Ok(mut window) = self.window.lock() {
            window.counts.clear();
            window.started_at = self.clock.now();
        }
    }
}

impl<C: Clock> Clone for FixedWindowLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            window: Arc::clone(&self.window),
            clock: Arc::clone(&self.clock),
        }
    }
}
