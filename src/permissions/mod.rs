// # Permissions
//
// Permissions are `resource:action` strings; the role table is static. The
// service layer caches checks for five minutes, invalidates on role change,
// and publishes audit events on denials.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::cache::{CacheManager, PERMISSION_CHECK_TTL_SECS};
use crate::error::{AppError, Result};
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Member,
    ReadOnly,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "member" => Some(Role::Member),
            "readonly" | "read_only" => Some(Role::ReadOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Member => "member",
            Role::ReadOnly => "readonly",
        }
    }
}

/// Static role -> permission-set table.
static ROLE_PERMISSIONS: Lazy<HashMap<Role, HashSet<&'static str>>> = Lazy::new(|| {
    let read_only: &[&str] = &[
        "product:read",
        "fitment:read",
        "media:read",
        "chat:read",
        "company:read",
    ];
    let member: &[&str] = &[
        "product:read",
        "fitment:read",
        "media:read",
        "media:create",
        "chat:read",
        "chat:create",
        "company:read",
        "user:read",
    ];
    let manager: &[&str] = &[
        "product:read",
        "product:create",
        "product:update",
        "fitment:read",
        "fitment:create",
        "fitment:update",
        "media:read",
        "media:create",
        "media:update",
        "media:delete",
        "chat:read",
        "chat:create",
        "chat:moderate",
        "company:read",
        "company:update",
        "user:read",
        "user:update",
        "sync:read",
        "sync:run",
    ];
    let admin: &[&str] = &[
        "product:read",
        "product:create",
        "product:update",
        "product:delete",
        "product:admin",
        "fitment:read",
        "fitment:create",
        "fitment:update",
        "fitment:delete",
        "media:read",
        "media:create",
        "media:update",
        "media:delete",
        "media:admin",
        "chat:read",
        "chat:create",
        "chat:moderate",
        "chat:admin",
        "company:read",
        "company:create",
        "company:update",
        "company:delete",
        "company:admin",
        "user:read",
        "user:create",
        "user:update",
        "user:delete",
        "user:admin",
        "sync:read",
        "sync:run",
        "sync:admin",
        "system:admin",
    ];

    let mut table = HashMap::new();
    table.insert(Role::ReadOnly, read_only.iter().copied().collect());
    table.insert(Role::Member, member.iter().copied().collect());
    table.insert(Role::Manager, manager.iter().copied().collect());
    table.insert(Role::Admin, admin.iter().copied().collect());
    table
});

/// The authenticated caller, as far as permission checks are concerned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub id: Uuid,
    pub role: Role,
    /// Explicit per-user grants on top of the role table.
    #[serde(default)]
    pub extra_permissions: Vec<String>,
}

impl UserPrincipal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            extra_permissions: Vec::new(),
        }
    }
}

/// Pure checker over the static role table.
pub struct PermissionChecker;

impl PermissionChecker {
    pub fn has_permission(user: &UserPrincipal, permission: &str) -> bool {
        if ROLE_PERMISSIONS
            .get(&user.role)
            .map(|set| set.contains(permission))
            .unwrap_or(false)
        {
            return true;
        }
        user.extra_permissions.iter().any(|p| p == permission)
    }

    /// Object-level check: the role grant applies, or the user owns the
    /// object via `owner_id`.
    pub fn check_object_permission(
        user: &UserPrincipal,
        owner_id: Option<Uuid>,
        permission: &str,
    ) -> bool {
        if Self::has_permission(user, permission) {
            return true;
        }
        owner_id.map(|owner| owner == user.id).unwrap_or(false)
    }

    pub fn permissions_for_role(role: Role) -> HashSet<&'static str> {
        ROLE_PERMISSIONS.get(&role).cloned().unwrap_or_default()
    }
}

/// Cached checker with audit events.
pub struct PermissionService {
    cache: Arc<CacheManager>,
    events: Arc<EventBus>,
}

impl PermissionService {
    pub fn new(cache: Arc<CacheManager>, events: Arc<EventBus>) -> Self {
        Self { cache, events }
    }

    fn check_key(user_id: Uuid, permission: &str) -> String {
        format!("permission:check:{}:{}", user_id, permission)
    }

    pub async fn check_permission(&self, user: &UserPrincipal, permission: &str) -> Result<bool> {
        let key = Self::check_key(user.id, permission);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            return Ok(cached == "1");
        }
        let granted = PermissionChecker::has_permission(user, permission);
        let _ = self
            .cache
            .set(
                &key,
                if granted { "1" } else { "0" },
                Some(Duration::from_secs(PERMISSION_CHECK_TTL_SECS)),
            )
            .await;
        Ok(granted)
    }

    pub async fn check_object_permission(
        &self,
        user: &UserPrincipal,
        owner_id: Option<Uuid>,
        permission: &str,
    ) -> Result<bool> {
        if self.check_permission(user, permission).await? {
            return Ok(true);
        }
        Ok(owner_id.map(|owner| owner == user.id).unwrap_or(false))
    }

    /// Raise `PermissionDenied` and publish `permission.denied` when the
    /// grant is missing.
    pub async fn ensure_permission(&self, user: &UserPrincipal, permission: &str) -> Result<()> {
        if self.check_permission(user, permission).await? {
            return Ok(());
        }
        self.events
            .publish(
                "permission.denied",
                json!({
                    "user_id": user.id,
                    "role": user.role.as_str(),
                    "permission": permission,
                }),
                None,
            )
            .await;
        Err(AppError::PermissionDenied(format!(
            "missing permission: {}",
            permission
        )))
    }

    pub async fn ensure_object_permission(
        &self,
        user: &UserPrincipal,
        owner_id: Option<Uuid>,
        permission: &str,
    ) -> Result<()> {
        if self
            .check_object_permission(user, owner_id, permission)
            .await?
        {
            return Ok(());
        }
        self.events
            .publish(
                "permission.object_denied",
                json!({
                    "user_id": user.id,
                    "role": user.role.as_str(),
                    "permission": permission,
                    "owner_id": owner_id,
                }),
                None,
            )
            .await;
        Err(AppError::PermissionDenied(format!(
            "missing object permission: {}",
            permission
        )))
    }

    /// Drop all cached checks for a user, e.g. after a role change.
    pub async fn invalidate_user(&self, user_id: Uuid) -> Result<()> {
        self.cache
            .invalidate_pattern(&format!("permission:check:{}:*", user_id), None)
            .await?;
        self.cache
            .delete(&format!("permissions:user:{}", user_id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;

    fn service() -> PermissionService {
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        PermissionService::new(cache, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_role_table() {
        let admin = UserPrincipal::new(Uuid::new_v4(), Role::Admin);
        let member = UserPrincipal::new(Uuid::new_v4(), Role::Member);

        assert!(PermissionChecker::has_permission(&admin, "product:delete"));
        assert!(!PermissionChecker::has_permission(&member, "product:delete"));
        assert!(PermissionChecker::has_permission(&member, "chat:create"));
    }

    #[test]
    fn test_extra_permissions() {
        let mut user = UserPrincipal::new(Uuid::new_v4(), Role::ReadOnly);
        assert!(!PermissionChecker::has_permission(&user, "sync:run"));
        user.extra_permissions.push("sync:run".to_string());
        assert!(PermissionChecker::has_permission(&user, "sync:run"));
    }

    #[test]
    fn test_object_ownership() {
        let user = UserPrincipal::new(Uuid::new_v4(), Role::Member);
        assert!(PermissionChecker::check_object_permission(
            &user,
            Some(user.id),
            "media:delete"
        ));
        assert!(!PermissionChecker::check_object_permission(
            &user,
            Some(Uuid::new_v4()),
            "media:delete"
        ));
    }

    #[tokio::test]
    async fn test_cached_check_matches_checker() {
        let svc = service();
        let user = UserPrincipal::new(Uuid::new_v4(), Role::Manager);

        let first = svc.check_permission(&user, "sync:run").await.unwrap();
        let second = svc.check_permission(&user, "sync:run").await.unwrap();
        assert!(first && second);
        assert_eq!(first, PermissionChecker::has_permission(&user, "sync:run"));
    }

    #[tokio::test]
    async fn test_ensure_permission_denied() {
        let svc = service();
        let user = UserPrincipal::new(Uuid::new_v4(), Role::ReadOnly);
        let err = svc.ensure_permission(&user, "product:delete").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_invalidate_user_clears_cache() {
        let svc = service();
        let user = UserPrincipal::new(Uuid::new_v4(), Role::ReadOnly);

        svc.check_permission(&user, "product:read").await.unwrap();
        svc.invalidate_user(user.id).await.unwrap();

        let key = PermissionService::check_key(user.id, "product:read");
        assert_eq!(svc.cache.get(&key).await.unwrap(), None);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("read_only"), Some(Role::ReadOnly));
        assert_eq!(Role::parse("wizard"), None);
    }
}
