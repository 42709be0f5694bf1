//! Per-family permission override rows

use crate::models::{Permission, PermissionOverride, Role};
use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// Load every override recorded for a family group
///
/// Rows naming an unknown role or permission are skipped with a warning so a
/// newer writer cannot break an older reader.
pub async fn load_overrides(db: &Pool<Sqlite>, family_group_id: Uuid) -> Result<Vec<PermissionOverride>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT role, permission, allowed FROM role_permissions WHERE family_group_id = ?",
    )
    .bind(family_group_id.to_string())
    .fetch_all(db)
    .await
    .map_err(Error::Database)?;

    let mut overrides = Vec::with_capacity(rows.len());
    for (role, permission, allowed) in rows {
        match (role.parse::<Role>(), permission.parse::<Permission>()) {
            (Ok(role), Ok(permission)) => overrides.push(PermissionOverride {
                family_group_id,
                role,
                permission,
                allowed: allowed != 0,
            }),
            _ => tracing::warn!(
                family_group_id = %family_group_id,
                role = %role,
                permission = %permission,
                "Skipping unrecognized permission override"
            ),
        }
    }

    Ok(overrides)
}

/// Insert or replace one override
pub async fn upsert_override(db: &Pool<Sqlite>, entry: &PermissionOverride) -> Result<()> {
    sqlx::query(
        "INSERT INTO role_permissions (family_group_id, role, permission, allowed, updated_at)
         VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(family_group_id, role, permission)
         DO UPDATE SET allowed = excluded.allowed, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(entry.family_group_id.to_string())
    .bind(entry.role.as_str())
    .bind(entry.permission.as_str())
    .bind(entry.allowed as i64)
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// Remove an override so the default table applies again
///
/// Returns true if a row was deleted.
pub async fn delete_override(
    db: &Pool<Sqlite>,
    family_group_id: Uuid,
    role: Role,
    permission: Permission,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM role_permissions WHERE family_group_id = ? AND role = ? AND permission = ?",
    )
    .bind(family_group_id.to_string())
    .bind(role.as_str())
    .bind(permission.as_str())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(result.rows_affected() > 0)
}
