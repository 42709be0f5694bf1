//! Error types for kinlore-fn
//!
//! Every handler error renders as `{"error": {"code": ..., "message": ...}}`.
//! Upstream and internal failures also carry the user-facing `category`,
//! `user_message` and `retryable` fields.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kinlore_common::user_error::{categorize_error, ErrorCategory, UserFacingError};
use serde_json::json;
use thiserror::Error;

use crate::services::upstream::UpstreamError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. revoking an accepted invitation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or wrong bearer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upload over the size limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Upload or upstream body of the wrong media type (415)
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// API key for the called function is not set (503)
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// External API failure
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// External failure reported as 502 whatever its cause
    #[error(transparent)]
    BadGateway(UpstreamError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// kinlore-common error
    #[error("Common error: {0}")]
    Common(#[from] kinlore_common::Error),
}

impl ApiError {
    fn upstream_status(err: &UpstreamError) -> (StatusCode, &'static str) {
        match err {
            UpstreamError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
            UpstreamError::Status { status: 429, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "UPSTREAM_RATE_LIMITED")
            }
            UpstreamError::UnsupportedContent(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE")
            }
            UpstreamError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            UpstreamError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            _ => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
        }
    }

    /// HTTP status this error renders with
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(err) => Self::upstream_status(err).0,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Common(kinlore_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(kinlore_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (error_code, message, category) = match self {
            ApiError::NotFound(msg) => ("NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg, None),
            ApiError::Conflict(msg) => ("CONFLICT", msg, None),
            ApiError::Unauthorized(msg) => ("UNAUTHORIZED", msg, None),
            ApiError::PayloadTooLarge(msg) => ("PAYLOAD_TOO_LARGE", msg, None),
            ApiError::UnsupportedMediaType(msg) => ("UNSUPPORTED_MEDIA_TYPE", msg, None),
            ApiError::NotConfigured(msg) => ("NOT_CONFIGURED", msg, None),
            ApiError::Upstream(ref err) => {
                tracing::warn!(error = %err, "Upstream call failed");
                let (_, code) = Self::upstream_status(err);
                (code, err.to_string(), Some(err.category()))
            }
            ApiError::BadGateway(ref err) => {
                tracing::warn!(error = %err, "Upstream call failed");
                ("UPSTREAM_ERROR", err.to_string(), Some(err.category()))
            }
            ApiError::Internal(msg) => ("INTERNAL_ERROR", msg, Some(ErrorCategory::Unknown)),
            ApiError::Io(ref err) => {
                tracing::error!(error = %err, "IO error");
                ("IO_ERROR", err.to_string(), Some(categorize_error(err)))
            }
            ApiError::Other(ref err) => {
                tracing::error!(error = %format!("{:#}", err), "Internal error");
                ("INTERNAL_ERROR", err.to_string(), Some(categorize_error(&**err)))
            }
            ApiError::Common(kinlore_common::Error::NotFound(msg)) => ("NOT_FOUND", msg, None),
            ApiError::Common(kinlore_common::Error::InvalidInput(msg)) => ("BAD_REQUEST", msg, None),
            ApiError::Common(ref err) => ("COMMON_ERROR", err.to_string(), None),
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(category) = category {
            let user_facing = UserFacingError::from(category);
            error["category"] = json!(user_facing.category);
            error["user_message"] = json!(user_facing.message);
            error["retryable"] = json!(user_facing.retryable);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
