//! kinlore-fn library interface
//!
//! The HTTP function gateway: transcription, narrative rewriting, image
//! pass-through, invitations, permission overrides and settings. Exposed as
//! a library so integration tests can drive the router directly.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use kinlore_common::permissions::{PermissionResolver, SqlitePermissionStore};
use kinlore_common::request_cache::Debouncer;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::services::{AudioQualityAnalyzer, ImageFetcher, UpstreamClients, UpstreamError};

/// Delay before settings changed through the API are written to TOML
pub const SETTINGS_SYNC_DELAY: Duration = Duration::from_secs(2);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Effective configuration; secrets change at runtime
    pub config: Arc<RwLock<GatewayConfig>>,
    /// Clients rebuilt whenever an API key changes
    pub clients: Arc<RwLock<UpstreamClients>>,
    /// Image pass-through with its 10 minute cache
    pub image_fetcher: Arc<ImageFetcher>,
    pub quality_analyzer: Arc<AudioQualityAnalyzer>,
    /// Role table with cached per-family overrides
    pub permissions: Arc<PermissionResolver<SqlitePermissionStore>>,
    /// Debounced TOML write-back for settings
    pub settings_sync: Arc<Debouncer>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: GatewayConfig) -> Result<Self, UpstreamError> {
        let clients = UpstreamClients::from_config(&config)?;
        let image_fetcher = ImageFetcher::new(config.allow_private_image_hosts)?;

        Ok(Self {
            permissions: Arc::new(PermissionResolver::new(SqlitePermissionStore::new(db.clone()))),
            db,
            config: Arc::new(RwLock::new(config)),
            clients: Arc::new(RwLock::new(clients)),
            image_fetcher: Arc::new(image_fetcher),
            quality_analyzer: Arc::new(AudioQualityAnalyzer::default()),
            settings_sync: Arc::new(Debouncer::new(SETTINGS_SYNC_DELAY)),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    /// Remember `message` for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
///
/// `/health` and `/api/buildinfo` are public; everything else sits behind
/// the bearer-token middleware (a no-op when no token is configured).
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::get;

    // Protected routes (require authentication)
    let protected = Router::new()
        .merge(api::transcribe_routes())
        .merge(api::rewrite_routes())
        .merge(api::image_proxy_routes())
        .merge(api::invitation_routes())
        .merge(api::permission_routes())
        .merge(api::settings_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    // Public routes (no authentication)
    let public = Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
