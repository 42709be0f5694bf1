//! Text-completion client (OpenAI-compatible `/chat/completions`)

use governor::DefaultDirectRateLimiter;
use kinlore_common::retry::{retry_with_backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::upstream::{build_http_client, check_status, rate_limiter, UpstreamError};

const RATE_LIMIT_PER_SECOND: u32 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Low temperature keeps rewrites close to the speaker's words
pub const REWRITE_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Text-completion API client
pub struct CompletionClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            http_client: build_http_client(REQUEST_TIMEOUT)?,
            rate_limiter: rate_limiter(RATE_LIMIT_PER_SECOND),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run a chat completion and return the first choice's text
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        retry_with_backoff("completion", &self.retry, UpstreamError::is_retryable, || {
            self.send(messages)
        })
        .await
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        self.rate_limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: REWRITE_TEMPERATURE,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| UpstreamError::Parse("Completion returned no choices".to_string()))
    }
}
