//! Circuit breaker for failing dependencies
//!
//! Wraps a fallible call and tracks consecutive failures. Once failures
//! reach the configured threshold the circuit opens and calls fail fast
//! without invoking the wrapped operation. After the recovery timeout a
//! single probe call is let through; its outcome decides whether the
//! circuit closes again or snaps back open.
//!
//! State transitions:
//! ```text
//! CLOSED    → OPEN:      consecutive failures reach failure_threshold
//! OPEN      → HALF_OPEN: next call once recovery_timeout elapsed
//! HALF_OPEN → CLOSED:    probe call succeeds (failure count resets)
//! HALF_OPEN → OPEN:      probe call fails (failure timestamp refreshed)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// Circuit is half-open, exactly one probe call is allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before allowing a probe call
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "recovery_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Admission ticket handed out by `try_acquire`
enum Admission {
    /// Closed-state pass-through
    Pass,
    /// Half-open probe slot
    Probe(ProbePermit),
}

impl Admission {
    /// Mark the admitted call as resolved; the probe slot (if any) is
    /// then owned by `record_success`/`record_failure`.
    fn resolve(self) {
        if let Admission::Probe(permit) = self {
            permit.resolve();
        }
    }
}

/// Holds the half-open probe slot for one admitted call
///
/// If the call never resolves (the future is dropped mid-flight, e.g.
/// by a caller-side timeout), dropping the permit frees the slot so the
/// next caller can run the probe instead of being rejected forever.
struct ProbePermit {
    slot: Arc<AtomicBool>,
    resolved: bool,
}

impl ProbePermit {
    fn resolve(mut self) {
        self.resolved = true;
    }
}

impl Drop for ProbePermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.slot.store(false, Ordering::Release);
        }
    }
}

/// Circuit breaker metrics snapshot for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_calls: u64,
    pub last_failure_time: Option<Instant>,
}

/// Circuit breaker over an injected fallible operation
///
/// The breaker never swallows the underlying error; it only gates
/// access. Internal state lives behind instance-scoped locks, so a
/// cloned or shared breaker is safe for concurrent calls. State is
/// process-local and not shared across instances.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU32>,
    success_count: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
    probe_in_flight: Arc<AtomicBool>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            success_count: Arc::clone(&self.success_count),
            total_calls: Arc::clone(&self.total_calls),
            last_failure_time: Arc::clone(&self.last_failure_time),
            probe_in_flight: Arc::clone(&self.probe_in_flight),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using
    /// the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("Default config should be valid")
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for
    /// testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU32::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            last_failure_time: Arc::new(RwLock::new(None)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(clock),
        })
    }

    /// Check whether a call may proceed, applying the OPEN → HALF_OPEN
    /// transition when the recovery timeout has elapsed.
    ///
    /// In half-open state only one caller wins the probe slot; everyone
    /// else is rejected until the probe resolves or its permit is
    /// dropped.
    fn try_acquire(&self) -> Option<Admission> {
        let state = self.read_state();

        match state {
            CircuitState::Closed => Some(Admission::Pass),
            CircuitState::Open => {
                let last_failure = match self.last_failure_time.read() {
                    Ok(guard) => *guard,
                    Err(poisoned) => {
                        warn!("Circuit breaker last_failure lock poisoned");
                        *poisoned.into_inner()
                    }
                };

                let failure_time = last_failure?;
                if self.clock.now().duration_since(failure_time) < self.config.recovery_timeout {
                    return None;
                }

                // Timeout elapsed: move to half-open and claim the probe
                // slot for this caller.
                if let Ok(mut guard) = self.state.write() {
                    if *guard == CircuitState::Open {
                        *guard = CircuitState::HalfOpen;
                        self.probe_in_flight.store(true, Ordering::Release);
                        debug!("Circuit breaker transitioning to HALF_OPEN for probe");
                        return Some(Admission::Probe(self.probe_permit()));
                    }
                    // Another caller raced us through the transition;
                    // fall through to the half-open probe claim.
                }
                self.claim_probe()
            }
            CircuitState::HalfOpen => self.claim_probe(),
        }
    }

    fn claim_probe(&self) -> Option<Admission> {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Admission::Probe(self.probe_permit()))
    }

    fn probe_permit(&self) -> ProbePermit {
        ProbePermit { slot: Arc::clone(&self.probe_in_flight), resolved: false }
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] while the
    /// circuit is open; otherwise invokes the operation and records the
    /// outcome.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(admission) = self.try_acquire() else {
            debug!(state = %self.state(), "circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(result) => {
                admission.resolve();
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                admission.resolve();
                self.record_failure();
                warn!(state = %self.state(), "circuit breaker: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(admission) = self.try_acquire() else {
            debug!(state = %self.state(), "circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation() {
            Ok(result) => {
                admission.resolve();
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                admission.resolve();
                self.record_failure();
                warn!(state = %self.state(), "circuit breaker: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful operation
    ///
    /// Closes the circuit after a successful half-open probe. Successes
    /// in the closed state keep the consecutive-failure count at zero.
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);

        match self.read_state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                if let Ok(mut guard) = self.state.write() {
                    *guard = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Release);
                }
                self.probe_in_flight.store(false, Ordering::Release);
                debug!("Circuit breaker closed after successful probe");
            }
            CircuitState::Open => {
                warn!("Received success while circuit is open");
            }
        }
    }

    /// Record a failed operation, opening the circuit at the threshold
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();

        if let Ok(mut last_failure) = self.last_failure_time.write() {
            *last_failure = Some(now);
        }

        match self.read_state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    if let Ok(mut guard) = self.state.write() {
                        *guard = CircuitState::Open;
                    }
                    warn!(failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe reopens immediately.
                if let Ok(mut guard) = self.state.write() {
                    *guard = CircuitState::Open;
                }
                self.probe_in_flight.store(false, Ordering::Release);
                warn!("Circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.read_state()
    }

    /// Get a metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.read_state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            last_failure_time: self.last_failure_time.read().ok().and_then(|guard| *guard),
        }
    }

    /// Reset the circuit breaker to the closed state
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);

        if let Ok(mut last_failure) = self.last_failure_time.write() {
            *last_failure = None;
        }
        if let Ok(mut guard) = self.state.write() {
            *guard = CircuitState::Closed;
        }
        debug!("Circuit breaker manually reset to closed state");
    }

    fn read_state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("Circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }
}
