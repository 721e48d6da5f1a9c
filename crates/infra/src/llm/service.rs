//! Composed LLM service facade
//!
//! Wraps an [`LlmCaller`] with the full guard chain: input screening,
//! then per-client rate limiting, then retry with exponential backoff,
//! then the circuit breaker around the actual call. Every call gets a
//! correlation id, an audit record, and usage accounting.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use deskrelay_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FixedWindowLimiter, RateLimiterConfig,
    ResilienceError, RetryConfig, RetryPolicy,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord, AuditSink, UsageStats};
use crate::config::ServiceConfig;
use crate::errors::InfraError;
use crate::llm::client::LlmCaller;

/// Substrings rejected before any call leaves the process
const SUSPICIOUS_PATTERNS: [&str; 4] = ["<script>", "<?php", "drop table", "delete from"];

/// One successful generation with its accounting
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub text: String,
    pub correlation_id: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub circuit_state: CircuitState,
}

/// Service health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `healthy` unless the breaker is open, then `degraded`
    pub status: &'static str,
    pub circuit_state: String,
    pub total_requests: u64,
    pub total_cost: f64,
}

/// Guarded LLM service
pub struct LlmService {
    config: ServiceConfig,
    caller: Arc<dyn LlmCaller>,
    audit: Arc<dyn AuditSink>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    limiter: FixedWindowLimiter,
    usage: Mutex<UsageStats>,
    metrics_path: Option<PathBuf>,
}

impl LlmService {
    pub fn new(
        config: ServiceConfig,
        caller: Arc<dyn LlmCaller>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, InfraError> {
        let breaker_config = CircuitBreakerConfig::builder()
            .failure_threshold(config.breaker.failure_threshold)
            .recovery_timeout(std::time::Duration::from_secs(config.breaker.recovery_timeout_secs))
            .build()
            .map_err(|e| InfraError::Config(e.to_string()))?;
        let retry_config = RetryConfig::builder()
            .max_retries(config.retry.max_retries)
            .base_delay(std::time::Duration::from_millis(config.retry.base_delay_ms))
            .build()
            .map_err(|e| InfraError::Config(e.to_string()))?;
        let limiter_config = RateLimiterConfig::builder()
            .max_requests(config.limiter.max_requests)
            .build()
            .map_err(|e| InfraError::Config(e.to_string()))?;

        Ok(Self {
            breaker: CircuitBreaker::new(breaker_config)
                .map_err(|e| InfraError::Config(e.to_string()))?,
            retry: RetryPolicy::new(retry_config).map_err(|e| InfraError::Config(e.to_string()))?,
            limiter: FixedWindowLimiter::new(limiter_config)
                .map_err(|e| InfraError::Config(e.to_string()))?,
            config,
            caller,
            audit,
            usage: Mutex::new(UsageStats::default()),
            metrics_path: None,
        })
    }

    /// Also write a usage snapshot to this path after every call
    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    /// Run one guarded generation for a client
    pub async fn generate(
        &self,
        client_id: &str,
        prompt: &str,
    ) -> Result<GenerateOutcome, ResilienceError<InfraError>> {
        let correlation_id = Uuid::new_v4().to_string();
        info!(correlation_id = %correlation_id, client_id, prompt_length = prompt.len(), "generation requested");

        if let Err(reason) = self.validate_input(prompt) {
            self.record(&correlation_id, client_id, AuditOutcome::Rejected, Some(&reason));
            warn!(correlation_id = %correlation_id, reason = %reason, "input rejected");
            return Err(ResilienceError::OperationFailed {
                source: InfraError::InvalidInput(reason),
            });
        }

        if let Err(err) = self.limiter.check::<InfraError>(client_id) {
            self.record(&correlation_id, client_id, AuditOutcome::RateLimited, None);
            return Err(err);
        }

        let result = self
            .retry
            .execute(|| self.breaker.execute(|| self.caller.generate(prompt)))
            .await;

        match result {
            Ok(reply) => {
                let tokens_used = estimate_tokens(prompt) + estimate_tokens(&reply.text);
                let cost = self.calculate_cost(tokens_used);
                self.track_usage(tokens_used, cost);
                self.record(
                    &correlation_id,
                    client_id,
                    AuditOutcome::Success,
                    Some(&format!("tokens={tokens_used}")),
                );
                info!(correlation_id = %correlation_id, tokens_used, cost, "generation completed");

                Ok(GenerateOutcome {
                    text: reply.text,
                    correlation_id,
                    tokens_used,
                    cost,
                    circuit_state: self.breaker.state(),
                })
            }
            Err(err) => {
                let err = flatten(err);
                self.record(&correlation_id, client_id, AuditOutcome::Failure, Some(&err.to_string()));
                warn!(correlation_id = %correlation_id, error = %err, state = %self.breaker.state(), "generation failed");
                Err(err)
            }
        }
    }

    /// `healthy` unless the breaker is open
    pub fn health_status(&self) -> HealthStatus {
        let state = self.breaker.state();
        let usage = self.usage_snapshot();
        HealthStatus {
            status: if state == CircuitState::Open { "degraded" } else { "healthy" },
            circuit_state: state.to_string(),
            total_requests: usage.total_requests,
            total_cost: usage.total_cost,
        }
    }

    pub fn usage_snapshot(&self) -> UsageStats {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn validate_input(&self, prompt: &str) -> Result<(), String> {
        let max_length = self.config.security.input_max_length;
        // Character count, not byte length: multibyte prompts must get
        // the same budget as ASCII ones.
        if prompt.chars().count() > max_length {
            return Err(format!("prompt exceeds {max_length} characters"));
        }

        let lowered = prompt.to_lowercase();
        for pattern in SUSPICIOUS_PATTERNS {
            if lowered.contains(pattern) {
                return Err(format!("prompt contains blocked pattern {pattern:?}"));
            }
        }
        Ok(())
    }

    fn calculate_cost(&self, tokens_used: u64) -> f64 {
        (tokens_used as f64 / 1000.0) * self.config.business.cost_per_1k_tokens
    }

    fn track_usage(&self, tokens_used: u64, cost: f64) {
        let snapshot = match self.usage.lock() {
            Ok(mut usage) => {
                usage.total_requests += 1;
                usage.total_tokens += tokens_used;
                usage.total_cost += cost;
                usage.clone()
            }
            Err(_) => return,
        };

        if let Some(path) = &self.metrics_path {
            if let Err(err) = crate::audit::write_usage_snapshot(path, &snapshot) {
                warn!(path = %path.display(), error = %err, "usage snapshot write failed");
            }
        }
    }

    fn record(&self, correlation_id: &str, client_id: &str, outcome: AuditOutcome, detail: Option<&str>) {
        let mut record = AuditRecord::new(correlation_id, client_id, "llm_generate", outcome);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        if let Err(err) = self.audit.append(&record) {
            warn!(error = %err, "audit append failed");
        }
    }
}

/// Whitespace-token estimate, matching the accounting granularity of
/// the cost model
fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Collapse the retry-over-breaker nesting into one error layer
fn flatten(err: ResilienceError<ResilienceError<InfraError>>) -> ResilienceError<InfraError> {
    match err {
        ResilienceError::RetriesExhausted { attempts, source } => match source {
            ResilienceError::CircuitOpen => ResilienceError::CircuitOpen,
            ResilienceError::Cancelled => ResilienceError::Cancelled,
            ResilienceError::RateLimitExceeded { client_id, max_requests, window } => {
                ResilienceError::RateLimitExceeded { client_id, max_requests, window }
            }
            ResilienceError::OperationFailed { source } => {
                ResilienceError::RetriesExhausted { attempts, source }
            }
            ResilienceError::RetriesExhausted { source, .. } => {
                ResilienceError::RetriesExhausted { attempts, source }
            }
        },
        ResilienceError::CircuitOpen => ResilienceError::CircuitOpen,
        ResilienceError::Cancelled => ResilienceError::Cancelled,
        ResilienceError::RateLimitExceeded { client_id, max_requests, window } => {
            ResilienceError::RateLimitExceeded { client_id, max_requests, window }
        }
        ResilienceError::OperationFailed { source } => source,
    }
}
