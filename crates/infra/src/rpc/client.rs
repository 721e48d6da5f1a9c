//! Tool-call RPC client
//!
//! Sends JSON-RPC 2.0 `tools/call` envelopes to a service instance
//! resolved through the registry. Discovery runs inside the retry
//! loop, so a retry after an instance failure can land on a different
//! healthy endpoint.

use std::sync::Arc;
use std::time::Duration;

use deskrelay_common::resilience::{ResilienceError, RetryConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::discovery::ServiceRegistry;
use crate::errors::InfraError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'static str,
    params: RpcParams<'a>,
}

#[derive(Debug, Serialize)]
struct RpcParams<'a> {
    name: &'a str,
    arguments: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Retrying JSON-RPC client over registry-discovered endpoints
pub struct ToolCallClient {
    http: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    retry: RetryPolicy,
    bearer_token: Option<String>,
}

impl ToolCallClient {
    pub fn new(registry: Arc<ServiceRegistry>) -> Result<Self, InfraError> {
        Self::with_retry(registry, RetryConfig::default())
    }

    pub fn with_retry(
        registry: Arc<ServiceRegistry>,
        retry_config: RetryConfig,
    ) -> Result<Self, InfraError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| InfraError::Network(e.to_string()))?;
        let retry = RetryPolicy::new(retry_config).map_err(|e| InfraError::Config(e.to_string()))?;
        Ok(Self { http, registry, retry, bearer_token: None })
    }

    /// Attach a bearer token to every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Invoke a named tool on the first healthy instance of a service
    /// type, retrying with backoff on transport and RPC failures
    pub async fn call_tool(
        &self,
        service_type: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, ResilienceError<InfraError>> {
        let result = self
            .retry
            .execute(|| self.call_once(service_type, tool_name, &arguments))
            .await;

        if let Err(err) = &result {
            warn!(service_type, tool_name, error = %err, "tool call failed");
        }
        result
    }

    async fn call_once(
        &self,
        service_type: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Value, InfraError> {
        let url = self.registry.discover(service_type).await?;
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: Uuid::new_v4().to_string(),
            method: "tools/call",
            params: RpcParams { name: tool_name, arguments },
        };

        debug!(service_type, tool_name, url = %url, request_id = %request.id, "sending tool call");

        let mut builder = self.http.post(&url).json(&request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::Http { status: status.as_u16() });
        }

        let envelope: RpcResponse = response.json().await?;
        match (envelope.result, envelope.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(InfraError::Rpc { code: error.code, message: error.message }),
            (None, None) => {
                Err(InfraError::Serialization("response carries neither result nor error".into()))
            }
        }
    }
}
