//! Infrastructure error taxonomy
//!
//! Conversions from external library errors live here, on the
//! infrastructure side, so the call sites stay `?`-friendly.

use thiserror::Error;

/// Errors produced by the infrastructure collaborators
#[derive(Debug, Error)]
pub enum InfraError {
    /// Transport-level failure (connect, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The RPC envelope carried an `error` member
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response body did not match the expected shape
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Registry file missing, unreadable, or malformed
    #[error("Service registry error: {0}")]
    Registry(String),

    /// No registered endpoint answered its health probe
    #[error("No healthy {service_type} endpoint available")]
    NoHealthyEndpoint { service_type: String },

    /// Input rejected before any call was made
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure from a sink or registry read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for InfraError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return InfraError::Http { status: status.as_u16() };
        }
        InfraError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        InfraError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = InfraError::Http { status: 503 };
        assert_eq!(err.to_string(), "HTTP error: status 503");

        let err = InfraError::Rpc { code: -32601, message: "method not found".into() };
        assert!(err.to_string().contains("-32601"));

        let err = InfraError::NoHealthyEndpoint { service_type: "customer_service".into() };
        assert!(err.to_string().contains("customer_service"));
    }

    #[test]
    fn test_json_error_converts_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: InfraError = parse_err.into();
        assert!(matches!(err, InfraError::Serialization(_)));
    }
}
