//! Audio endpoints: transcription and recording quality

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

use super::upload::{read_audio_form, AudioUpload, AUDIO_BODY_LIMIT};
use crate::services::{QualityReport, TranscriptionClient, TranscriptionRequest};
use crate::{ApiError, ApiResult, AppState};

/// Response for POST /api/transcribe
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Absent when the upload could not be decoded locally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
}

async fn transcription_client(state: &AppState) -> ApiResult<Arc<TranscriptionClient>> {
    state
        .clients
        .read()
        .await
        .transcription
        .clone()
        .ok_or_else(|| {
            ApiError::NotConfigured(
                "Transcription is unavailable: the OpenAI API key is not configured".to_string(),
            )
        })
}

/// Decode and analyze on the blocking pool
async fn analyze(state: &AppState, audio: &AudioUpload) -> anyhow::Result<QualityReport> {
    let analyzer = Arc::clone(&state.quality_analyzer);
    let bytes = audio.bytes.clone();
    let extension = audio.extension();
    tokio::task::spawn_blocking(move || analyzer.analyze_encoded(bytes, extension.as_deref()))
        .await
        .context("Audio analysis task failed")?
}

/// POST /api/transcribe
///
/// **Request:** multipart with `audio` (required), `language`, `prompt`
/// **Response:** `{"text": "...", "language": "en", "duration_seconds": 12.5, "quality": {...}}`
///
/// The quality check runs alongside the upstream call and never fails the
/// request.
pub async fn transcribe(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<TranscribeResponse>> {
    let client = transcription_client(&state).await?;
    let form = read_audio_form(multipart).await?;

    let request = TranscriptionRequest {
        audio: form.audio.bytes.clone(),
        file_name: form.audio.file_name.clone(),
        content_type: form.audio.content_type.clone(),
        language: form.language.clone(),
        prompt: form.prompt.clone(),
    };

    let (quality, transcription) = tokio::join!(analyze(&state, &form.audio), client.transcribe(&request));

    let quality = match quality {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::debug!(error = %e, file = %form.audio.file_name, "Quality check skipped");
            None
        }
    };

    let transcription = match transcription {
        Ok(t) => t,
        Err(e) => {
            state.record_error(format!("transcribe: {}", e)).await;
            return Err(e.into());
        }
    };

    Ok(Json(TranscribeResponse {
        text: transcription.text.trim().to_string(),
        language: transcription.language.or(form.language),
        duration_seconds: transcription
            .duration
            .or_else(|| quality.as_ref().map(|q| q.duration_seconds)),
        quality,
    }))
}

/// POST /api/audio/quality
///
/// **Request:** multipart with `audio`
/// **Response:** the quality report
///
/// **Errors:**
/// - 415 Unsupported Media Type: not audio, or not decodable
pub async fn audio_quality(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<QualityReport>> {
    let form = read_audio_form(multipart).await?;

    let report = analyze(&state, &form.audio).await.map_err(|e| {
        ApiError::UnsupportedMediaType(format!("Could not decode audio: {:#}", e))
    })?;

    tracing::info!(
        file = %form.audio.file_name,
        acceptable = report.acceptable,
        issues = report.issues.len(),
        "Audio quality checked"
    );
    Ok(Json(report))
}

/// Build audio routes
pub fn transcribe_routes() -> Router<AppState> {
    Router::new()
        .route("/api/transcribe", post(transcribe))
        .route("/api/audio/quality", post(audio_quality))
        .layer(DefaultBodyLimit::max(AUDIO_BODY_LIMIT))
}
