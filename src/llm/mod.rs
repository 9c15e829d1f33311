//! Language model interface and OpenAI-compatible HTTP client
//!
//! The translator and report synthesizer only see the [`LanguageModel`]
//! trait. [`OpenAiCompatibleClient`] talks to any `/chat/completions`
//! endpoint (Groq, OpenAI, Ollama).
//!
//! Retry strategy inside a single call:
//! - HTTP 429 or 5xx: retry with exponential backoff
//! - other HTTP 4xx: fail immediately
//! - network error or timeout: retry

use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Language model is disabled in configuration")]
    Disabled,

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited | LlmError::Timeout(_) | LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Text completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a single prompt, returning the raw model text
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// `base * 2^(attempt-1)`, capped at `max`. Attempt 0 has no delay.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64 << (attempt - 1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible chat completion APIs
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if !config.enabled {
            return Err(LlmError::Disabled);
        }

        let api_key = if config.requires_api_key() {
            let key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| LlmError::MissingApiKey(config.api_key_env.clone()))?;
            Some(key)
        } else {
            None
        };

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        tracing::info!(
            "Language model client ready: {} via {}",
            config.model,
            config.endpoint()
        );

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String, LlmError> {
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("empty choices array".to_string()))?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!("Model response was truncated at max_tokens");
        }

        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(LlmError::InvalidResponse("empty message content".to_string())),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.backoff_base_ms, self.backoff_max_ms, attempt);
                tracing::debug!("Retrying model call in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Model call failed: {}", e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Transport("no attempts made".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
