//! Error taxonomy for the resilience patterns
//!
//! The patterns never reinterpret an underlying operation failure; they
//! either gate access (circuit open, rate limited), count and re-raise
//! (`OperationFailed`), or report exhaustion of their own budget
//! (`RetriesExhausted`). The original error stays reachable through
//! `source` in every wrapping variant.

use std::time::Duration;

use thiserror::Error;

/// Configuration validation error shared by the pattern builders
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced by the resilience patterns
///
/// Generic over the wrapped operation's error type `E` so the original
/// failure is preserved rather than stringified.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open and the recovery timeout has not elapsed.
    /// The wrapped operation was not invoked. Callers should treat the
    /// dependency as unavailable rather than retry immediately.
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Every attempt failed; `source` is the last-observed failure.
    #[error("All retry attempts exhausted after {attempts} tries")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Per-client quota exceeded in the current window. Callers should
    /// back off until the window resets.
    #[error("Rate limit exceeded for client {client_id}: {max_requests} requests per {window:?}")]
    RateLimitExceeded { client_id: String, max_requests: u32, window: Duration },

    /// A pending retry backoff wait was aborted by a cancellation signal.
    #[error("Operation cancelled while waiting to retry")]
    Cancelled,

    /// The underlying operation failed; passed through unchanged apart
    /// from this wrapper.
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Recover the underlying operation error, if this variant carries
    /// one.
    pub fn into_source(self) -> Option<E> {
        match self {
            ResilienceError::RetriesExhausted { source, .. }
            | ResilienceError::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
