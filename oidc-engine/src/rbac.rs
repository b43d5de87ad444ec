//! Role-based permission resolution with a time-bounded, explicitly
//! invalidated cache.

use crate::clock::Clock;
use crate::error::OAuthError;
use crate::model::Role;
use crate::store::{IdentityRepository, UserUpdate};
use log::{debug, info};
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const WILDCARD: &str = "*";

/// A user's effective permissions, the union over all assigned roles.
///
/// Entries are `resource:action` strings. `*` grants everything and
/// `resource:*` grants every action on `resource`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: &str) {
        let permission = permission.trim();
        if !permission.is_empty() {
            self.0.insert(permission.to_string());
        }
    }

    /// True when `required` is present or covered by a wildcard
    pub fn grants(&self, required: &str) -> bool {
        if self.0.contains(WILDCARD) || self.0.contains(required) {
            return true;
        }
        match required.split_once(':') {
            Some((resource, _)) => self.0.contains(&format!("{resource}:{WILDCARD}")),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<'a> FromIterator<&'a str> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectStatus {
    Active,
    Inactive,
    NotFound,
}

/// What the cache holds for one user
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: SubjectStatus,
    pub permissions: PermissionSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CheckReason {
    GrantedByRole,
    NoMatchingPermission,
    UserInactive,
    UserNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: CheckReason,
}

#[derive(Clone)]
struct CacheEntry {
    resolution: Arc<Resolution>,
    cached_at: i64,
}

/// Per-user cache of resolved permissions.
///
/// Freshness is judged by the injected clock. Invalidation bumps an epoch
/// under the same lock that guards inserts, so a resolution that started
/// before an invalidation can never be written back after it.
pub struct PermissionCache {
    entries: Cache<String, CacheEntry>,
    ttl: i64,
    clock: Arc<dyn Clock>,
    epoch: AtomicU64,
    write_lock: Mutex<()>,
}

impl PermissionCache {
    pub fn new(ttl_secs: u64, capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self {
            entries,
            ttl: ttl_secs as i64,
            clock,
            epoch: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Resolution>> {
        let entry = self.entries.get(user_id)?;
        if self.clock.now() - entry.cached_at >= self.ttl {
            self.entries.invalidate(user_id);
            return None;
        }
        Some(entry.resolution)
    }

    /// Store `resolution` only if no invalidation happened since `epoch` was read
    pub fn insert_if_current(&self, user_id: &str, resolution: Arc<Resolution>, epoch: u64) -> bool {
        let _guard = self.write_lock.lock();
        if self.epoch() != epoch {
            return false;
        }
        self.entries.insert(
            user_id.to_string(),
            CacheEntry {
                resolution,
                cached_at: self.clock.now(),
            },
        );
        true
    }

    pub fn invalidate<S: AsRef<str>>(&self, user_ids: &[S]) {
        let _guard = self.write_lock.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for user_id in user_ids {
            self.entries.invalidate(user_id.as_ref());
        }
    }
}

/// Resolves and checks permissions, and applies role administration with
/// write-through invalidation.
pub struct PermissionEvaluator {
    identities: Arc<dyn IdentityRepository>,
    cache: PermissionCache,
}

impl PermissionEvaluator {
    pub fn new(identities: Arc<dyn IdentityRepository>, cache: PermissionCache) -> Self {
        Self { identities, cache }
    }

    /// Effective permissions of `user_id`. Unknown and inactive users have none.
    pub fn resolve(&self, user_id: &str) -> Result<PermissionSet, OAuthError> {
        Ok(self.resolution(user_id)?.permissions.clone())
    }

    pub fn check(&self, user_id: &str, required: &str) -> Result<bool, OAuthError> {
        Ok(self.decide(user_id, required)?.allowed)
    }

    /// Like [`check`](Self::check) but explains the outcome
    pub fn decide(&self, user_id: &str, required: &str) -> Result<PermissionDecision, OAuthError> {
        let resolution = self.resolution(user_id)?;
        let (allowed, reason) = match resolution.status {
            SubjectStatus::NotFound => (false, CheckReason::UserNotFound),
            SubjectStatus::Inactive => (false, CheckReason::UserInactive),
            SubjectStatus::Active if resolution.permissions.grants(required) => {
                (true, CheckReason::GrantedByRole)
            }
            SubjectStatus::Active => (false, CheckReason::NoMatchingPermission),
        };
        Ok(PermissionDecision { allowed, reason })
    }

    fn resolution(&self, user_id: &str) -> Result<Arc<Resolution>, OAuthError> {
        if let Some(hit) = self.cache.get(user_id) {
            debug!("Permission cache hit for user '{}'", user_id);
            return Ok(hit);
        }
        let epoch = self.cache.epoch();
        let resolution = Arc::new(self.load(user_id)?);
        if !self.cache.insert_if_current(user_id, resolution.clone(), epoch) {
            debug!(
                "Discarded permission resolution for '{}' superseded by an invalidation",
                user_id
            );
        }
        Ok(resolution)
    }

    fn load(&self, user_id: &str) -> Result<Resolution, OAuthError> {
        let Some(user) = self.identities.find_user(user_id)? else {
            return Ok(Resolution {
                status: SubjectStatus::NotFound,
                permissions: PermissionSet::new(),
            });
        };
        if !user.active {
            return Ok(Resolution {
                status: SubjectStatus::Inactive,
                permissions: PermissionSet::new(),
            });
        }
        let mut permissions = PermissionSet::new();
        for role_name in &user.roles {
            // A dangling assignment to a deleted role grants nothing
            if let Some(role) = self.identities.find_role(role_name)? {
                for permission in &role.permissions {
                    permissions.insert(permission);
                }
            }
        }
        Ok(Resolution {
            status: SubjectStatus::Active,
            permissions,
        })
    }

    pub fn assign_role(&self, user_id: &str, role: &str) -> Result<(), OAuthError> {
        match self.identities.add_user_role(user_id, role)? {
            UserUpdate::UserNotFound => return Err(unknown_user(user_id)),
            UserUpdate::RoleNotFound => {
                return Err(OAuthError::invalid_request(format!("unknown role '{role}'")));
            }
            UserUpdate::Applied | UserUpdate::Unchanged => {}
        }
        self.cache.invalidate(&[user_id]);
        info!("Assigned role '{}' to user '{}'", role, user_id);
        Ok(())
    }

    pub fn unassign_role(&self, user_id: &str, role: &str) -> Result<(), OAuthError> {
        if self.identities.remove_user_role(user_id, role)? == UserUpdate::UserNotFound {
            return Err(unknown_user(user_id));
        }
        self.cache.invalidate(&[user_id]);
        info!("Removed role '{}' from user '{}'", role, user_id);
        Ok(())
    }

    /// Create or replace a role's permissions
    pub fn set_role_permissions(&self, role: &str, permissions: Vec<String>) -> Result<(), OAuthError> {
        self.identities.save_role(Role {
            name: role.to_string(),
            permissions,
        })?;
        let affected = self.identities.users_with_role(role)?;
        self.cache.invalidate(affected.as_slice());
        info!(
            "Updated permissions of role '{}', invalidated {} cached users",
            role,
            affected.len()
        );
        Ok(())
    }

    pub fn delete_role(&self, role: &str) -> Result<bool, OAuthError> {
        let affected = self.identities.users_with_role(role)?;
        let existed = self.identities.delete_role(role)?;
        self.cache.invalidate(affected.as_slice());
        info!("Deleted role '{}' held by {} users", role, affected.len());
        Ok(existed)
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), OAuthError> {
        if self.identities.set_user_active(user_id, active)? == UserUpdate::UserNotFound {
            return Err(unknown_user(user_id));
        }
        self.cache.invalidate(&[user_id]);
        info!("User '{}' active={}", user_id, active);
        Ok(())
    }

    /// Remove the user outright. Returns false when there was no such user.
    pub fn delete_user(&self, user_id: &str) -> Result<bool, OAuthError> {
        let existed = self.identities.delete_user(user_id)?;
        self.cache.invalidate(&[user_id]);
        if existed {
            info!("Deleted user '{}'", user_id);
        }
        Ok(existed)
    }

    /// Drop cached resolutions after an out-of-band change to these users
    pub fn invalidate_users<S: AsRef<str>>(&self, user_ids: &[S]) {
        self.cache.invalidate(user_ids);
    }
}

fn unknown_user(user_id: &str) -> OAuthError {
    OAuthError::invalid_request(format!("unknown user '{user_id}'"))
}
