//! Transactional email client (Resend-compatible `/emails`)
//!
//! A message with an idempotency key is sent with an `Idempotency-Key`
//! header, so retrying after a timeout or 5xx cannot deliver it twice. A
//! message without one is only retried on 429, where the provider
//! certainly did not accept it.

use kinlore_common::retry::{retry_with_backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::upstream::{build_http_client, check_status, UpstreamError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outgoing message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Sent as the `Idempotency-Key` header, never in the body
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Email provider client
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl EmailClient {
    pub fn new(base_url: &str, api_key: String, retry: RetryPolicy) -> Result<Self, UpstreamError> {
        Ok(Self {
            http_client: build_http_client(REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        })
    }

    /// Send `message`, returning the provider's message id
    pub async fn send(&self, message: &EmailMessage) -> Result<String, UpstreamError> {
        let idempotent = message.idempotency_key.is_some();
        let should_retry = |e: &UpstreamError| {
            if idempotent {
                e.is_retryable()
            } else {
                matches!(e, UpstreamError::Status { status: 429, .. })
            }
        };

        let id = retry_with_backoff("send_email", &self.retry, should_retry, || self.post(message)).await?;

        tracing::info!(email_id = %id, recipients = message.to.len(), "Email accepted by provider");
        Ok(id)
    }

    async fn post(&self, message: &EmailMessage) -> Result<String, UpstreamError> {
        let mut request = self
            .http_client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(message);
        if let Some(key) = &message.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await?;
        let response = check_status(response).await?;

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;
        Ok(parsed.id)
    }
}
