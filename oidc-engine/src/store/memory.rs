use super::{
    ClientRepository, CodeConsumption, CodeRepository, ConsentRepository, IdentityRepository,
    RotationOutcome, StorageError, StorageResult, TokenRepository, UserUpdate,
};
use crate::model::{
    AccessTokenRecord, AuthorizationCode, Client, ConsentGrant, RefreshTokenRecord, Role, User,
};
use crate::scope::ScopeSet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

#[derive(Default)]
struct TokenTables {
    access: HashMap<String, AccessTokenRecord>,
    refresh: HashMap<String, RefreshTokenRecord>,
}

impl TokenTables {
    fn revoke_refresh(&mut self, id: &str) -> bool {
        let changed = match self.refresh.get_mut(id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        };
        for access in self.access.values_mut() {
            if access.refresh_token_id.as_deref() == Some(id) {
                access.revoked = true;
            }
        }
        changed
    }
}

#[derive(Default)]
struct Identity {
    users: HashMap<String, User>,
    roles: HashMap<String, Role>,
}

/// In-process implementation of every repository.
///
/// Each table group sits behind its own lock, and every multi-record
/// operation takes the lock once, so it is applied entirely or not at all.
#[derive(Default)]
pub struct MemoryStore {
    clients: RwLock<HashMap<String, Client>>,
    identity: RwLock<Identity>,
    codes: Mutex<HashMap<String, AuthorizationCode>>,
    tokens: Mutex<TokenTables>,
    consents: RwLock<HashMap<(String, String), ConsentGrant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientRepository for MemoryStore {
    fn find_client(&self, client_id: &str) -> StorageResult<Option<Client>> {
        Ok(self.clients.read().get(client_id).cloned())
    }

    fn save_client(&self, client: Client) -> StorageResult<()> {
        self.clients.write().insert(client.id.clone(), client);
        Ok(())
    }

    fn delete_client(&self, client_id: &str) -> StorageResult<bool> {
        Ok(self.clients.write().remove(client_id).is_some())
    }
}

impl IdentityRepository for MemoryStore {
    fn find_user(&self, user_id: &str) -> StorageResult<Option<User>> {
        Ok(self.identity.read().users.get(user_id).cloned())
    }

    fn save_user(&self, user: User) -> StorageResult<()> {
        self.identity.write().users.insert(user.id.clone(), user);
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> StorageResult<bool> {
        Ok(self.identity.write().users.remove(user_id).is_some())
    }

    fn add_user_role(&self, user_id: &str, role: &str) -> StorageResult<UserUpdate> {
        let mut identity = self.identity.write();
        if !identity.roles.contains_key(role) {
            return Ok(UserUpdate::RoleNotFound);
        }
        let Some(user) = identity.users.get_mut(user_id) else {
            return Ok(UserUpdate::UserNotFound);
        };
        if user.roles.iter().any(|r| r == role) {
            return Ok(UserUpdate::Unchanged);
        }
        user.roles.push(role.to_string());
        Ok(UserUpdate::Applied)
    }

    fn remove_user_role(&self, user_id: &str, role: &str) -> StorageResult<UserUpdate> {
        let mut identity = self.identity.write();
        let Some(user) = identity.users.get_mut(user_id) else {
            return Ok(UserUpdate::UserNotFound);
        };
        let before = user.roles.len();
        user.roles.retain(|r| r != role);
        Ok(if user.roles.len() == before {
            UserUpdate::Unchanged
        } else {
            UserUpdate::Applied
        })
    }

    fn set_user_active(&self, user_id: &str, active: bool) -> StorageResult<UserUpdate> {
        let mut identity = self.identity.write();
        Ok(match identity.users.get_mut(user_id) {
            None => UserUpdate::UserNotFound,
            Some(user) if user.active == active => UserUpdate::Unchanged,
            Some(user) => {
                user.active = active;
                UserUpdate::Applied
            }
        })
    }

    fn find_role(&self, name: &str) -> StorageResult<Option<Role>> {
        Ok(self.identity.read().roles.get(name).cloned())
    }

    fn save_role(&self, role: Role) -> StorageResult<()> {
        self.identity.write().roles.insert(role.name.clone(), role);
        Ok(())
    }

    fn delete_role(&self, name: &str) -> StorageResult<bool> {
        let mut identity = self.identity.write();
        let existed = identity.roles.remove(name).is_some();
        for user in identity.users.values_mut() {
            user.roles.retain(|r| r != name);
        }
        Ok(existed)
    }

    fn users_with_role(&self, name: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .identity
            .read()
            .users
            .values()
            .filter(|u| u.roles.iter().any(|r| r == name))
            .map(|u| u.id.clone())
            .collect())
    }
}

impl CodeRepository for MemoryStore {
    fn insert_code(&self, code: AuthorizationCode) -> StorageResult<()> {
        let mut codes = self.codes.lock();
        if codes.contains_key(&code.code) {
            return Err(StorageError::Conflict("authorization code".to_string()));
        }
        codes.insert(code.code.clone(), code);
        Ok(())
    }

    fn consume_code(&self, code: &str) -> StorageResult<CodeConsumption> {
        let mut codes = self.codes.lock();
        Ok(match codes.get_mut(code) {
            None => CodeConsumption::NotFound,
            Some(record) if record.consumed => CodeConsumption::AlreadyConsumed,
            Some(record) => {
                record.consumed = true;
                CodeConsumption::Consumed(record.clone())
            }
        })
    }

    fn purge_expired_codes(&self, now: i64) -> StorageResult<usize> {
        let mut codes = self.codes.lock();
        let before = codes.len();
        codes.retain(|_, c| !c.is_expired(now));
        Ok(before - codes.len())
    }
}

impl TokenRepository for MemoryStore {
    fn insert_token_set(
        &self,
        access: AccessTokenRecord,
        refresh: Option<RefreshTokenRecord>,
    ) -> StorageResult<()> {
        let mut tables = self.tokens.lock();
        if tables.access.contains_key(&access.jti) {
            return Err(StorageError::Conflict("access token jti".to_string()));
        }
        if let Some(refresh) = refresh {
            if tables.refresh.contains_key(&refresh.id) {
                return Err(StorageError::Conflict("refresh token".to_string()));
            }
            tables.refresh.insert(refresh.id.clone(), refresh);
        }
        tables.access.insert(access.jti.clone(), access);
        Ok(())
    }

    fn find_access_token(&self, jti: &str) -> StorageResult<Option<AccessTokenRecord>> {
        Ok(self.tokens.lock().access.get(jti).cloned())
    }

    fn revoke_access_token(&self, jti: &str) -> StorageResult<bool> {
        let mut tables = self.tokens.lock();
        Ok(match tables.access.get_mut(jti) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        })
    }

    fn find_refresh_token(&self, id: &str) -> StorageResult<Option<RefreshTokenRecord>> {
        Ok(self.tokens.lock().refresh.get(id).cloned())
    }

    fn rotate_refresh_token(
        &self,
        old_id: &str,
        successor: RefreshTokenRecord,
        access: AccessTokenRecord,
    ) -> StorageResult<RotationOutcome> {
        let mut tables = self.tokens.lock();
        if tables.refresh.contains_key(&successor.id) || tables.access.contains_key(&access.jti) {
            return Err(StorageError::Conflict("rotated token".to_string()));
        }
        let Some(old) = tables.refresh.get_mut(old_id) else {
            return Ok(RotationOutcome::NotFound);
        };
        if let Some(existing) = &old.rotated_to {
            return Ok(RotationOutcome::AlreadyRotated {
                successor: existing.clone(),
            });
        }
        if old.revoked {
            return Ok(RotationOutcome::Revoked);
        }
        old.rotated_to = Some(successor.id.clone());
        tables.refresh.insert(successor.id.clone(), successor);
        tables.access.insert(access.jti.clone(), access);
        Ok(RotationOutcome::Rotated)
    }

    fn revoke_refresh_token(&self, id: &str) -> StorageResult<bool> {
        Ok(self.tokens.lock().revoke_refresh(id))
    }

    fn revoke_refresh_chain(&self, from_id: &str) -> StorageResult<Vec<String>> {
        let mut tables = self.tokens.lock();
        let mut revoked = Vec::new();
        let mut cursor = Some(from_id.to_string());
        while let Some(id) = cursor {
            // A chain is linear, but a corrupted pointer must not loop forever
            if revoked.contains(&id) {
                break;
            }
            cursor = tables.refresh.get(&id).and_then(|r| r.rotated_to.clone());
            if tables.refresh.contains_key(&id) {
                tables.revoke_refresh(&id);
                revoked.push(id);
            }
        }
        Ok(revoked)
    }

    fn refresh_tokens_for(&self, user_id: &str, client_id: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .tokens
            .lock()
            .refresh
            .values()
            .filter(|r| r.user_id == user_id && r.client_id == client_id)
            .map(|r| r.id.clone())
            .collect())
    }

    fn purge_expired_tokens(&self, now: i64) -> StorageResult<usize> {
        let mut tables = self.tokens.lock();
        let before = tables.access.len() + tables.refresh.len();
        tables.access.retain(|_, a| now < a.expires_at);
        // Rotated records are kept until they expire so replay stays detectable
        tables.refresh.retain(|_, r| !r.is_expired(now));
        Ok(before - tables.access.len() - tables.refresh.len())
    }
}

impl ConsentRepository for MemoryStore {
    fn find_consent(&self, user_id: &str, client_id: &str) -> StorageResult<Option<ConsentGrant>> {
        Ok(self
            .consents
            .read()
            .get(&(user_id.to_string(), client_id.to_string()))
            .cloned())
    }

    fn merge_consent(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
        now: i64,
    ) -> StorageResult<ConsentGrant> {
        let mut consents = self.consents.write();
        let grant = consents
            .entry((user_id.to_string(), client_id.to_string()))
            .and_modify(|grant| {
                grant.scope = grant.scope.union(scope);
                grant.granted_at = now;
            })
            .or_insert_with(|| ConsentGrant {
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
                scope: scope.clone(),
                granted_at: now,
            });
        Ok(grant.clone())
    }

    fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool> {
        Ok(self
            .consents
            .write()
            .remove(&(user_id.to_string(), client_id.to_string()))
            .is_some())
    }
}
