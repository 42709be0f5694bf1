//! Role/permission table with per-family overrides
//!
//! The static table answers for any family that has not customised its
//! roles. Overrides are loaded from a [`PermissionStore`] and cached per
//! family group for [`PERMISSION_CACHE_TTL`]. Owners always hold every
//! permission and cannot be overridden.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Permission, PermissionOverride, Role};
use crate::request_cache::RequestCache;
use crate::{Error, Result};

/// How long a family's override set is trusted before reloading
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default answer for `role` performing `permission`
pub fn default_permission(role: Role, permission: Permission) -> bool {
    use Permission::*;
    match role {
        Role::Owner => true,
        Role::Editor => matches!(
            permission,
            ViewContent | CreateContent | EditContent | DeleteContent | RecordAudio | UploadPhotos
        ),
        Role::Viewer => matches!(permission, ViewContent),
    }
}

/// Full default map for a role
pub fn default_permissions(role: Role) -> BTreeMap<Permission, bool> {
    Permission::ALL
        .iter()
        .map(|&p| (p, default_permission(role, p)))
        .collect()
}

/// Backing store for per-family overrides
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn load_overrides(&self, family_group_id: Uuid) -> Result<Vec<PermissionOverride>>;

    async fn save_override(&self, entry: &PermissionOverride) -> Result<()>;

    /// Returns true if an override existed
    async fn clear_override(
        &self,
        family_group_id: Uuid,
        role: Role,
        permission: Permission,
    ) -> Result<bool>;
}

/// Overrides kept in the local `role_permissions` table
#[derive(Clone)]
pub struct SqlitePermissionStore {
    db: SqlitePool,
}

impl SqlitePermissionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    async fn load_overrides(&self, family_group_id: Uuid) -> Result<Vec<PermissionOverride>> {
        crate::db::role_permissions::load_overrides(&self.db, family_group_id).await
    }

    async fn save_override(&self, entry: &PermissionOverride) -> Result<()> {
        crate::db::role_permissions::upsert_override(&self.db, entry).await
    }

    async fn clear_override(
        &self,
        family_group_id: Uuid,
        role: Role,
        permission: Permission,
    ) -> Result<bool> {
        crate::db::role_permissions::delete_override(&self.db, family_group_id, role, permission)
            .await
    }
}

/// Answers permission checks, consulting cached overrides first
pub struct PermissionResolver<S> {
    store: Arc<S>,
    cache: RequestCache<Arc<Vec<PermissionOverride>>>,
    ttl: Duration,
}

impl<S: PermissionStore + 'static> PermissionResolver<S> {
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, PERMISSION_CACHE_TTL)
    }

    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self {
            store: Arc::new(store),
            cache: RequestCache::new(),
            ttl,
        }
    }

    fn cache_key(family_group_id: Uuid) -> String {
        format!("permissions:{}", family_group_id)
    }

    /// Override set for a family, or `None` when the store is unavailable
    async fn overrides(&self, family_group_id: Uuid) -> Option<Arc<Vec<PermissionOverride>>> {
        let store = Arc::clone(&self.store);
        let result = self
            .cache
            .get_or_fetch(&Self::cache_key(family_group_id), self.ttl, move || async move {
                let overrides = store.load_overrides(family_group_id).await?;
                debug!(
                    family_group_id = %family_group_id,
                    count = overrides.len(),
                    "Loaded permission overrides"
                );
                Ok(Arc::new(overrides))
            })
            .await;

        match result {
            Ok(overrides) => Some(overrides),
            Err(e) => {
                warn!(
                    family_group_id = %family_group_id,
                    error = %e,
                    "Permission overrides unavailable, using default role table"
                );
                None
            }
        }
    }

    /// Whether `role` may perform `permission` in the given family group
    pub async fn is_allowed(&self, family_group_id: Uuid, role: Role, permission: Permission) -> bool {
        if role == Role::Owner {
            return true;
        }

        self.overrides(family_group_id)
            .await
            .and_then(|overrides| {
                overrides
                    .iter()
                    .find(|o| o.role == role && o.permission == permission)
                    .map(|o| o.allowed)
            })
            .unwrap_or_else(|| default_permission(role, permission))
    }

    /// Every permission for `role` in the family, overrides applied
    pub async fn permissions_for(&self, family_group_id: Uuid, role: Role) -> BTreeMap<Permission, bool> {
        let mut map = default_permissions(role);
        if role == Role::Owner {
            return map;
        }

        if let Some(overrides) = self.overrides(family_group_id).await {
            for o in overrides.iter().filter(|o| o.role == role) {
                map.insert(o.permission, o.allowed);
            }
        }
        map
    }

    /// Record an override (`Some`) or restore the default (`None`)
    ///
    /// The family's cached override set is dropped so the change applies to
    /// the next check.
    pub async fn set_override(
        &self,
        family_group_id: Uuid,
        role: Role,
        permission: Permission,
        allowed: Option<bool>,
    ) -> Result<()> {
        if role == Role::Owner {
            return Err(Error::InvalidInput(
                "Owner permissions cannot be overridden".to_string(),
            ));
        }

        match allowed {
            Some(allowed) => {
                self.store
                    .save_override(&PermissionOverride {
                        family_group_id,
                        role,
                        permission,
                        allowed,
                    })
                    .await?
            }
            None => {
                self.store
                    .clear_override(family_group_id, role, permission)
                    .await?;
            }
        }

        self.cache.invalidate(&Self::cache_key(family_group_id)).await;
        Ok(())
    }
}
