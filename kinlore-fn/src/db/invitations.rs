//! Invitation database operations

use chrono::{DateTime, Utc};
use kinlore_common::models::{Invitation, InvitationStatus};
use kinlore_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::retry_on_lock;

/// Store a new invitation
pub async fn insert_invitation(pool: &SqlitePool, invitation: &Invitation) -> Result<()> {
    let id = invitation.id.to_string();
    let family_group_id = invitation.family_group_id.to_string();
    let invited_by = invitation.invited_by.map(|u| u.to_string());
    let created_at = invitation.created_at.to_rfc3339();
    let expires_at = invitation.expires_at.to_rfc3339();

    retry_on_lock("insert_invitation", || async {
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id, token, family_group_id, email, role,
                invited_by, status, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&invitation.token)
        .bind(&family_group_id)
        .bind(&invitation.email)
        .bind(invitation.role.as_str())
        .bind(&invited_by)
        .bind(invitation.status.as_str())
        .bind(&created_at)
        .bind(&expires_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Look up an invitation by its link token
pub async fn get_invitation_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Invitation>> {
    let row = sqlx::query(
        r#"
        SELECT id, token, family_group_id, email, role,
               invited_by, status, created_at, expires_at
        FROM invitations
        WHERE token = ?
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<Invitation> {
        let invited_by: Option<String> = row.get("invited_by");
        Ok(Invitation {
            id: parse_uuid(row.get("id"))?,
            token: row.get("token"),
            family_group_id: parse_uuid(row.get("family_group_id"))?,
            email: row.get("email"),
            role: row.get::<String, _>("role").parse()?,
            invited_by: invited_by.as_deref().map(parse_uuid).transpose()?,
            status: row.get::<String, _>("status").parse()?,
            created_at: parse_time(row.get("created_at"))?,
            expires_at: parse_time(row.get("expires_at"))?,
        })
    })
    .transpose()
}

/// Move an invitation from `from` to `to`
///
/// Returns false when the token is unknown or the invitation is no longer
/// in state `from`.
pub async fn transition_status(
    pool: &SqlitePool,
    token: &str,
    from: InvitationStatus,
    to: InvitationStatus,
) -> Result<bool> {
    let result = retry_on_lock("transition_invitation_status", || async {
        sqlx::query("UPDATE invitations SET status = ? WHERE token = ? AND status = ?")
            .bind(to.as_str())
            .bind(token)
            .bind(from.as_str())
            .execute(pool)
            .await
            .map_err(Error::Database)
    })
    .await?;

    Ok(result.rows_affected() > 0)
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Corrupt UUID '{}': {}", value, e)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Corrupt timestamp '{}': {}", value, e)))
}
