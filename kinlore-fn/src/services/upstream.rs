//! Shared plumbing for outbound API calls
//!
//! HTTP client construction, status checking, error classification and
//! rate limiting used by every upstream client.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use kinlore_common::user_error::ErrorCategory;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest upstream error body kept for logs and responses
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Upstream call errors
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Upstream response too large ({0} bytes)")]
    TooLarge(u64),

    /// The upstream pointed us somewhere we will not go
    #[error("Upstream refused: {0}")]
    Refused(String),
}

impl UpstreamError {
    /// Network failures, timeouts, 429 and 5xx are transient
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Network(_) | UpstreamError::Timeout => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// User-facing category. An upstream 401 means our key is wrong, not
    /// that the user's session expired.
    pub fn category(&self) -> ErrorCategory {
        match self {
            UpstreamError::Network(_) => ErrorCategory::Network,
            UpstreamError::Timeout => ErrorCategory::Timeout,
            UpstreamError::Status { status: 429, .. } => ErrorCategory::RateLimited,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_decode() {
            UpstreamError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            UpstreamError::Network(e.to_string())
        }
    }
}

/// Apply the Kinlore user agent and timeouts to `builder`
pub fn http_client_builder(builder: reqwest::ClientBuilder, timeout: Duration) -> reqwest::ClientBuilder {
    builder
        .user_agent(kinlore_common::config::get_user_agent())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
}

/// Build a reqwest client with the Kinlore user agent
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    http_client_builder(reqwest::Client::builder(), timeout)
        .build()
        .map_err(|e| UpstreamError::Network(e.to_string()))
}

/// Turn non-2xx responses into `UpstreamError::Status`
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body: truncate(&body, MAX_ERROR_BODY_CHARS),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Token-bucket limiter allowing `per_second` requests per second
pub fn rate_limiter(per_second: u32) -> Arc<DefaultDirectRateLimiter> {
    let rate = NonZeroU32::new(per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}
