//! Family role/permission endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use kinlore_common::models::{Permission, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    /// Limit the answer to one role
    #[serde(default)]
    pub role: Option<String>,
}

/// Resolved permissions per role
#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub family_group_id: Uuid,
    pub roles: BTreeMap<Role, BTreeMap<Permission, bool>>,
}

/// GET /api/families/:group_id/permissions?role=editor
///
/// Overrides applied; every role when `role` is omitted.
pub async fn get_permissions(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<RoleQuery>,
) -> ApiResult<Json<PermissionsResponse>> {
    let roles = match query.role.as_deref() {
        Some(role) => vec![role.parse::<Role>()?],
        None => Role::ALL.to_vec(),
    };

    let mut resolved = BTreeMap::new();
    for role in roles {
        resolved.insert(role, state.permissions.permissions_for(group_id, role).await);
    }

    Ok(Json(PermissionsResponse {
        family_group_id: group_id,
        roles: resolved,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub role: String,
    pub permission: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub role: Role,
    pub permission: Permission,
    pub allowed: bool,
}

/// GET /api/families/:group_id/permissions/check?role=viewer&permission=record_audio
pub async fn check_permission(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<Json<CheckResponse>> {
    let role: Role = query.role.parse()?;
    let permission: Permission = query.permission.parse()?;
    let allowed = state.permissions.is_allowed(group_id, role, permission).await;
    Ok(Json(CheckResponse { role, permission, allowed }))
}

/// Request payload for PUT /api/families/:group_id/permissions
#[derive(Debug, Deserialize)]
pub struct SetOverrideRequest {
    pub role: String,
    pub permission: String,
    /// `null` restores the default for this role
    pub allowed: Option<bool>,
}

/// PUT /api/families/:group_id/permissions
///
/// **Request:** `{"role": "viewer", "permission": "record_audio", "allowed": true}`
/// **Response:** the role's resolved permissions after the change
///
/// **Errors:**
/// - 400 Bad Request: unknown role or permission, or an owner override
pub async fn set_override(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<SetOverrideRequest>,
) -> ApiResult<Json<PermissionsResponse>> {
    let role: Role = payload.role.parse()?;
    let permission: Permission = payload.permission.parse()?;

    state
        .permissions
        .set_override(group_id, role, permission, payload.allowed)
        .await?;

    tracing::info!(
        family_group_id = %group_id,
        role = %role,
        permission = %permission,
        allowed = ?payload.allowed,
        "Permission override updated"
    );

    let mut roles = BTreeMap::new();
    roles.insert(role, state.permissions.permissions_for(group_id, role).await);
    Ok(Json(PermissionsResponse {
        family_group_id: group_id,
        roles,
    }))
}

/// Build permission routes
pub fn permission_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/families/:group_id/permissions",
            get(get_permissions).put(set_override),
        )
        .route("/api/families/:group_id/permissions/check", get(check_permission))
}
