//! Service configuration
//!
//! Loads DeskRelay configuration from a TOML file, falling back to
//! built-in defaults when no file is present.
//!
//! ## Loading Strategy
//! 1. Probe `./deskrelay.toml`, then `./config.toml`
//! 2. Apply environment overrides
//! 3. Fall back to defaults if nothing was found
//!
//! ## Environment Variables
//! - `DESKRELAY_LLM_BASE_URL`: generation endpoint base URL
//! - `DESKRELAY_LLM_MODEL`: model name

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::InfraError;

/// LLM endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub num_predict: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2:3b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 30,
            temperature: 0.7,
            num_predict: 150,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 60 }
    }
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 1000 }
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub max_requests: u32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self { max_requests: 100 }
    }
}

/// Input screening settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub input_max_length: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self { input_max_length: 10_000 }
    }
}

/// Cost accounting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessSettings {
    pub cost_per_1k_tokens: f64,
}

impl Default for BusinessSettings {
    fn default() -> Self {
        Self { cost_per_1k_tokens: 0.002 }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub llm: LlmConfig,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub limiter: LimiterSettings,
    pub security: SecuritySettings,
    pub business: BusinessSettings,
}

impl ServiceConfig {
    /// Load configuration with the probe-then-default strategy
    pub fn load() -> Result<Self, InfraError> {
        let mut config = Self::load_from_probed_paths()?.unwrap_or_else(|| {
            tracing::info!("no config file found, using built-in defaults");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| InfraError::Config(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    fn load_from_probed_paths() -> Result<Option<Self>, InfraError> {
        for candidate in ["deskrelay.toml", "config.toml"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_file(path).map(Some);
            }
        }
        Ok(None)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("DESKRELAY_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(model) = std::env::var("DESKRELAY_LLM_MODEL") {
            self.llm.model = model;
        }
    }
}
