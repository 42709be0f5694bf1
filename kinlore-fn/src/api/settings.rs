//! Settings API endpoint
//!
//! POST /api/settings/:key stores an API key set from the web UI. The
//! database is authoritative; the TOML file is a debounced backup.

use crate::config::{is_valid_key, sync_settings_to_toml, ApiSecret};
use crate::services::UpstreamClients;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Request payload for setting an API key
#[derive(Debug, Deserialize)]
pub struct SetSettingRequest {
    pub value: String,
}

/// Response payload for settings changes
#[derive(Debug, Serialize)]
pub struct SetSettingResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/settings/:key handler
///
/// **Request:** `{"value": "sk-..."}` with key `openai_api_key` or `email_api_key`
/// **Response:** `{"success": true, "message": "..."}`
///
/// **Behavior:**
/// 1. Validate key name and value (non-empty, non-whitespace)
/// 2. Write to database (authoritative)
/// 3. Rebuild the upstream clients so the key applies immediately
/// 4. Schedule the TOML write-back (debounced 2 s)
///
/// **Errors:**
/// - 404 Not Found: unknown setting key
/// - 400 Bad Request: empty or whitespace-only value
/// - 500 Internal Server Error: database write failure
pub async fn set_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<SetSettingRequest>,
) -> ApiResult<Json<SetSettingResponse>> {
    let secret = ApiSecret::from_setting_key(&key)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown setting: {}", key)))?;

    let value = payload.value.trim().to_string();
    if !is_valid_key(&value) {
        return Err(ApiError::BadRequest(
            "Value cannot be empty or whitespace-only".to_string(),
        ));
    }

    kinlore_common::db::settings::set_setting(&state.db, secret.setting_key(), &value)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save setting to database: {}", e)))?;

    let (clients, toml_path) = {
        let mut config = state.config.write().await;
        config.set_secret(secret, Some(value.clone()));
        (UpstreamClients::from_config(&config)?, config.toml_path.clone())
    };
    *state.clients.write().await = clients;

    info!(setting = secret.setting_key(), "API key configured via settings endpoint");

    // Snapshot every secret when the write runs; one write covers a burst
    match toml_path {
        Some(path) => {
            let config = Arc::clone(&state.config);
            state.settings_sync.call(move || async move {
                let settings: HashMap<String, String> = {
                    let config = config.read().await;
                    ApiSecret::ALL
                        .into_iter()
                        .filter_map(|s| config.secret(s).map(|v| (s.setting_key().to_string(), v.to_string())))
                        .collect()
                };
                if let Err(e) = sync_settings_to_toml(settings, &path).await {
                    warn!("TOML sync failed (database write succeeded): {}", e);
                }
            });
        }
        None => warn!("No TOML path configured; setting stored in database only"),
    }

    Ok(Json(SetSettingResponse {
        success: true,
        message: format!("{} configured successfully", secret.setting_key()),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/api/settings/:key", post(set_setting))
}
