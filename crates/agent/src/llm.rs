//! OpenAI-compatible chat completion client behind the `Brain` trait.

use std::time::Duration;

use async_trait::async_trait;
use reservo_core::config::LlmEndpoint;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completed model call.
#[derive(Clone, Debug)]
pub struct BrainResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("llm response contained no choices")]
    EmptyResponse,
}

/// Produces a candidate reply from the conversation so far. The pipeline
/// treats any error as a signal to fall back to the deterministic reply.
#[async_trait]
pub trait Brain: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<BrainResponse, BrainError>;
}

/// `Brain` over an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpBrain {
    client: reqwest::Client,
    endpoint: LlmEndpoint,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

impl HttpBrain {
    pub fn new(endpoint: LlmEndpoint) -> Result<Self, BrainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Brain for HttpBrain {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<BrainResponse, BrainError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        let payload = CompletionRequest {
            model: &self.endpoint.model,
            temperature: self.endpoint.temperature,
            messages,
        };

        let mut request = self.client.post(&url).json(&payload);
        if let Some(api_key) = &self.endpoint.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrainError::Api { status: status.as_u16(), body });
        }

        let completion: CompletionResponse = response.json().await?;
        debug!(model = completion.model.as_deref(), "chat completion received");

        let choice = completion.choices.into_iter().next().ok_or(BrainError::EmptyResponse)?;
        Ok(BrainResponse {
            content: choice.message.content,
            model: completion.model.unwrap_or_else(|| self.endpoint.model.clone()),
            usage: completion.usage,
        })
    }
}
