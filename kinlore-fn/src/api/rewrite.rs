//! Transcript rewriting endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::services::narrative_writer::{self, RewriteMode, RewriteRequest};
use crate::{ApiError, ApiResult, AppState};

/// Request payload for POST /api/rewrite
#[derive(Debug, Deserialize)]
pub struct RewritePayload {
    pub transcript: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub narrator: Option<String>,
    #[serde(default)]
    pub mode: RewriteMode,
}

#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub text: String,
    pub mode: RewriteMode,
    pub model: String,
}

/// POST /api/rewrite
///
/// **Request:** `{"transcript": "...", "question": "...", "narrator": "...", "mode": "narrative"}`
/// **Response:** `{"text": "...", "mode": "narrative", "model": "gpt-4o-mini"}`
///
/// **Errors:**
/// - 400 Bad Request: empty transcript, or over 20 000 characters
/// - 503 Service Unavailable: OpenAI API key not configured
pub async fn rewrite(
    State(state): State<AppState>,
    Json(payload): Json<RewritePayload>,
) -> ApiResult<Json<RewriteResponse>> {
    let request = RewriteRequest::new(&payload.transcript, payload.question, payload.narrator, payload.mode)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let client = state.clients.read().await.completion.clone().ok_or_else(|| {
        ApiError::NotConfigured("Rewriting is unavailable: the OpenAI API key is not configured".to_string())
    })?;

    match narrative_writer::rewrite(&client, &request).await {
        Ok(text) => Ok(Json(RewriteResponse {
            text,
            mode: request.mode,
            model: client.model().to_string(),
        })),
        Err(e) => {
            state.record_error(format!("rewrite: {}", e)).await;
            Err(e.into())
        }
    }
}

/// Build rewrite routes
pub fn rewrite_routes() -> Router<AppState> {
    Router::new().route("/api/rewrite", post(rewrite))
}
