//! Health check and build information endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Which functions have the API key they need
#[derive(Debug, Serialize)]
pub struct ConfiguredFunctions {
    pub transcribe: bool,
    pub rewrite: bool,
    pub invitations: bool,
}

/// Image pass-through cache occupancy and counters
#[derive(Debug, Serialize)]
pub struct ImageCacheHealth {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub shared: u64,
    pub evictions: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when some function lacks its API key
    pub status: String,
    /// Module name ("kinlore-fn")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub functions: ConfiguredFunctions,
    pub image_cache: ImageCacheHealth,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    let functions = {
        let clients = state.clients.read().await;
        ConfiguredFunctions {
            transcribe: clients.transcription.is_some(),
            rewrite: clients.completion.is_some(),
            invitations: clients.email.is_some(),
        }
    };
    let stats = state.image_fetcher.stats();
    let image_cache = ImageCacheHealth {
        entries: state.image_fetcher.cached_images().await,
        hits: stats.hits,
        misses: stats.misses,
        shared: stats.shared,
        evictions: stats.evictions,
    };

    let all_configured = functions.transcribe && functions.rewrite && functions.invitations;

    Json(HealthResponse {
        status: if all_configured { "ok" } else { "degraded" }.to_string(),
        module: "kinlore-fn".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        functions,
        image_cache,
        last_error,
    })
}

/// Build information response
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
}

/// GET /api/buildinfo
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
