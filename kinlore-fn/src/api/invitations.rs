//! Family invitation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use kinlore_common::models::{Invitation, InvitationStatus, Role};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::invitations as invitation_db;
use crate::services::invitation_mailer::{invite_url, is_plausible_email, InvitationEmail};
use crate::{ApiError, ApiResult, AppState};

/// Request payload for POST /api/invitations
#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub family_group_id: Uuid,
    pub family_name: String,
    pub email: String,
    pub role: String,
    pub inviter_name: String,
    #[serde(default)]
    pub invited_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    pub invitation: Invitation,
    pub invite_url: String,
    pub email_id: String,
}

/// Invitation as seen now (pending past expiry reads as expired)
#[derive(Debug, Serialize)]
pub struct InvitationView {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub invite_url: String,
}

/// POST /api/invitations
///
/// **Behavior:**
/// 1. Validate email, role (never owner) and names
/// 2. Store the pending invitation
/// 3. Send the invitation email
///
/// **Errors:**
/// - 400 Bad Request: invalid email, unknown or owner role, empty names
/// - 503 Service Unavailable: email API key not configured
/// - 502 Bad Gateway: email provider failure (the invitation stays pending
///   so the client can resend)
pub async fn create_invitation(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvitationRequest>,
) -> ApiResult<(StatusCode, Json<CreateInvitationResponse>)> {
    if !is_plausible_email(&payload.email) {
        return Err(ApiError::BadRequest(format!("Invalid email address: {}", payload.email)));
    }
    let role: Role = payload.role.parse()?;
    let family_name = payload.family_name.trim();
    let inviter_name = payload.inviter_name.trim();
    if family_name.is_empty() || inviter_name.is_empty() {
        return Err(ApiError::BadRequest(
            "family_name and inviter_name are required".to_string(),
        ));
    }

    let email_client = state.clients.read().await.email.clone().ok_or_else(|| {
        ApiError::NotConfigured("Invitations are unavailable: the email API key is not configured".to_string())
    })?;

    let invitation = Invitation::new(payload.family_group_id, &payload.email, role, payload.invited_by)?;
    invitation_db::insert_invitation(&state.db, &invitation).await?;

    let (app_base_url, from) = {
        let config = state.config.read().await;
        (config.app_base_url.clone(), config.email_from.clone())
    };
    let email = InvitationEmail {
        invitation: &invitation,
        family_name,
        inviter_name,
        app_base_url: &app_base_url,
        from: &from,
    };

    let email_id = match email_client.send(&email.to_message()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(
                invitation_id = %invitation.id,
                error = %e,
                "Invitation stored but email delivery failed"
            );
            state.record_error(format!("invitation email: {}", e)).await;
            return Err(e.into());
        }
    };

    info!(
        invitation_id = %invitation.id,
        family_group_id = %invitation.family_group_id,
        role = %invitation.role,
        "Invitation sent"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            invite_url: email.url(),
            invitation,
            email_id,
        }),
    ))
}

async fn load(state: &AppState, token: &str) -> ApiResult<Invitation> {
    invitation_db::get_invitation_by_token(&state.db, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))
}

async fn view(state: &AppState, mut invitation: Invitation) -> InvitationView {
    invitation.status = invitation.effective_status(kinlore_common::time::now());
    let app_base_url = state.config.read().await.app_base_url.clone();
    InvitationView {
        invite_url: invite_url(&app_base_url, &invitation.token),
        invitation,
    }
}

/// GET /api/invitations/:token
pub async fn get_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitationView>> {
    let invitation = load(&state, &token).await?;
    Ok(Json(view(&state, invitation).await))
}

/// POST /api/invitations/:token/revoke
///
/// **Errors:**
/// - 404 Not Found: unknown token
/// - 409 Conflict: invitation is not pending (accepted, revoked or expired)
pub async fn revoke_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitationView>> {
    let invitation = load(&state, &token).await?;

    let current = invitation.effective_status(kinlore_common::time::now());
    if current != InvitationStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "Invitation is {}, only pending invitations can be revoked",
            current.as_str()
        )));
    }

    let revoked = invitation_db::transition_status(
        &state.db,
        &token,
        InvitationStatus::Pending,
        InvitationStatus::Revoked,
    )
    .await?;
    if !revoked {
        return Err(ApiError::Conflict("Invitation changed state concurrently".to_string()));
    }

    info!(invitation_id = %invitation.id, "Invitation revoked");
    let invitation = load(&state, &token).await?;
    Ok(Json(view(&state, invitation).await))
}

/// Build invitation routes
pub fn invitation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/invitations", post(create_invitation))
        .route("/api/invitations/:token", get(get_invitation))
        .route("/api/invitations/:token/revoke", post(revoke_invitation))
}
