//! Speech-to-text client (OpenAI-compatible `/audio/transcriptions`)

use axum::body::Bytes;
use governor::DefaultDirectRateLimiter;
use kinlore_common::retry::{retry_with_backoff, RetryPolicy};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::upstream::{build_http_client, check_status, rate_limiter, UpstreamError};

/// Requests per second allowed towards the provider
const RATE_LIMIT_PER_SECOND: u32 = 5;

/// Long recordings take a while to transcribe
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One transcription job
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Bytes,
    pub file_name: String,
    pub content_type: String,
    /// ISO-639-1 hint, e.g. "en"
    pub language: Option<String>,
    /// Vocabulary or context hint (family names, places)
    pub prompt: Option<String>,
}

/// Provider answer with `response_format=verbose_json`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Speech-to-text API client
pub struct TranscriptionClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl TranscriptionClient {
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

    /// Transcribe one recording, retrying transient failures
    pub async fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcription, UpstreamError> {
        if request.audio.is_empty() {
            return Err(UpstreamError::InvalidRequest("Audio file is empty".to_string()));
        }

        let transcription = retry_with_backoff(
            "transcription",
            &self.retry,
            UpstreamError::is_retryable,
            || self.send(request),
        )
        .await?;

        tracing::info!(
            model = %self.model,
            chars = transcription.text.len(),
            duration_seconds = ?transcription.duration,
            "Transcription complete"
        );
        Ok(transcription)
    }

    async fn send(&self, request: &TranscriptionRequest) -> Result<Transcription, UpstreamError> {
        self.rate_limiter.until_ready().await;

        // Bytes clones are reference-counted; each attempt rebuilds the form
        let file = Part::stream(reqwest::Body::from(request.audio.clone()))
            .file_name(request.file_name.clone())
            .mime_str(&request.content_type)
            .map_err(|e| UpstreamError::InvalidRequest(format!("Bad content type: {}", e)))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }

        tracing::debug!(
            operation = "transcription",
            bytes = request.audio.len(),
            "Sending audio to speech-to-text API"
        );

        let response = self
            .http_client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .json::<Transcription>()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}
