//! Test Helper Utilities
//!
//! Shared utilities for testing kinlore-fn

#![allow(dead_code)]

pub mod fake_upstream;

pub use fake_upstream::FakeUpstream;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use kinlore_common::retry::RetryPolicy;
use kinlore_fn::config::GatewayConfig;
use kinlore_fn::{build_router, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token-123";
pub const MULTIPART_BOUNDARY: &str = "kinlore-test-boundary";

/// In-memory database with the full schema
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    kinlore_common::db::create_schema(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

/// Fast retries so failure tests stay quick
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(50),
    }
}

/// Configuration with every key set and every host pointed at `upstream`
pub fn test_config(upstream: &FakeUpstream) -> GatewayConfig {
    GatewayConfig {
        openai_api_key: Some("sk-test".to_string()),
        openai_base_url: upstream.openai_base_url(),
        email_api_key: Some("re-test".to_string()),
        email_base_url: upstream.base_url.clone(),
        app_base_url: "https://kinlore.test".to_string(),
        retry: fast_retry(),
        allow_private_image_hosts: true,
        ..GatewayConfig::default()
    }
}

pub async fn test_app(config: GatewayConfig) -> (axum::Router, AppState) {
    let pool = test_pool().await;
    let state = AppState::new(pool, config).expect("Failed to build app state");
    (build_router(state.clone()), state)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Multipart body with one file field plus plain text fields
pub fn multipart_request(
    uri: &str,
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// 16-bit mono WAV of a sine tone (amplitude 0.0 gives silence)
pub fn wav_bytes(duration_seconds: f64, sample_rate: u32, amplitude: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let total = (duration_seconds * sample_rate as f64) as usize;
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let sample = amplitude * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
