//! Local stand-in for the speech-to-text, completion, email and image hosts
//!
//! Binds 127.0.0.1:0 so tests run in parallel without port clashes.

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 1x1 transparent PNG
pub const PNG_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

pub const TRANSCRIPT_TEXT: &str = "  Grandma was born in nineteen thirty-one in a small village.  ";
pub const REWRITTEN_TEXT: &str = "Grandma was born in 1931 in a small village.";
pub const EMAIL_ID: &str = "email-0001";

/// What the fake hosts saw
#[derive(Clone, Default)]
pub struct Recorded {
    /// Multipart field names of each transcription request
    pub transcriptions: Arc<Mutex<Vec<Vec<String>>>>,
    pub completions: Arc<Mutex<Vec<Value>>>,
    pub emails: Arc<Mutex<Vec<Value>>>,
    pub authorization: Arc<Mutex<Vec<String>>>,
    pub image_hits: Arc<AtomicUsize>,
    /// Upcoming completion requests answered with 503
    pub completion_failures: Arc<AtomicUsize>,
    /// Upcoming email requests answered with 422
    pub email_rejections: Arc<AtomicUsize>,
    /// Upcoming email requests answered with 503
    pub email_outages: Arc<AtomicUsize>,
    /// `Idempotency-Key` header of every email request, accepted or not
    pub email_idempotency_keys: Arc<Mutex<Vec<String>>>,
}

pub struct FakeUpstream {
    /// `http://127.0.0.1:<port>`
    pub base_url: String,
    pub recorded: Recorded,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let recorded = Recorded::default();

        let app = Router::new()
            .route("/v1/audio/transcriptions", post(transcriptions))
            .route("/v1/chat/completions", post(chat_completions))
            .route("/emails", post(emails))
            .route("/images/photo.png", get(photo))
            .route("/images/page.html", get(page))
            .route("/images/missing.png", get(missing))
            .route("/images/moved.png", get(moved))
            .route("/images/loop.png", get(redirect_loop))
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            recorded,
        }
    }

    /// Base URL for the OpenAI-compatible endpoints
    pub fn openai_base_url(&self) -> String {
        format!("{}/v1", self.base_url)
    }

    pub fn image_url(&self, name: &str) -> String {
        format!("{}/images/{}", self.base_url, name)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn record_auth(recorded: &Recorded, headers: &HeaderMap) {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        recorded.authorization.lock().unwrap().push(value.to_string());
    }
}

async fn transcriptions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    record_auth(&recorded, &headers);

    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        fields.push(field.name().unwrap_or_default().to_string());
        let _ = field.bytes().await;
    }
    recorded.transcriptions.lock().unwrap().push(fields);

    Json(json!({
        "task": "transcribe",
        "text": TRANSCRIPT_TEXT,
        "language": "en",
        "duration": 3.5
    }))
    .into_response()
}

async fn chat_completions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_auth(&recorded, &headers);

    if take_one(&recorded.completion_failures) {
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
    }
    recorded.completions.lock().unwrap().push(body);

    Json(json!({
        "id": "chatcmpl-1",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": format!("\"{}\"", REWRITTEN_TEXT) } }
        ]
    }))
    .into_response()
}

async fn emails(State(recorded): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record_auth(&recorded, &headers);
    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        recorded.email_idempotency_keys.lock().unwrap().push(key.to_string());
    }

    if take_one(&recorded.email_outages) {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }
    if take_one(&recorded.email_rejections) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": "Invalid `to` field" })),
        )
            .into_response();
    }
    recorded.emails.lock().unwrap().push(body);

    Json(json!({ "id": EMAIL_ID })).into_response()
}

async fn photo(State(recorded): State<Recorded>) -> Response {
    recorded.image_hits.fetch_add(1, Ordering::SeqCst);
    // Slow enough for concurrent proxy requests to overlap
    tokio::time::sleep(Duration::from_millis(100)).await;
    ([(header::CONTENT_TYPE, "image/png")], PNG_PIXEL).into_response()
}

async fn page() -> Response {
    ([(header::CONTENT_TYPE, "text/html")], "<html></html>").into_response()
}

async fn missing() -> Response {
    (StatusCode::NOT_FOUND, "no such image").into_response()
}

async fn moved() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/images/photo.png")]).into_response()
}

async fn redirect_loop() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/images/loop.png")]).into_response()
}
