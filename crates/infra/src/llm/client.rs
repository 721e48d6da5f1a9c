//! LLM generation client
//!
//! Speaks the Ollama-style generation protocol: a single
//! `POST /api/generate` with a non-streaming completion request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::errors::InfraError;

/// One completed generation
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateReply {
    /// Generated completion text
    #[serde(rename = "response")]
    pub text: String,
}

/// Capability to produce a completion for a prompt
///
/// The service layer depends on this trait, so tests can substitute a
/// scripted caller without standing up an HTTP endpoint.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GenerateReply, InfraError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: u32,
}

/// HTTP client for the generation endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, InfraError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| InfraError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmCaller for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<GenerateReply, InfraError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
            },
        };

        debug!(model = %self.config.model, prompt_length = prompt.len(), "sending generation request");

        let response = self.http.post(self.generate_url()).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::Http { status: status.as_u16() });
        }

        let reply: GenerateReply = response.json().await?;
        debug!(reply_length = reply.text.len(), "generation completed");
        Ok(reply)
    }
}
