//! Persistence collaborator interfaces.
//!
//! The engine never talks to a database directly. Each component depends on
//! the narrow repository trait it needs, and a backend implements all of them
//! (see [`Store`]). Operations that must be atomic with respect to concurrent
//! callers, such as [`CodeRepository::consume_code`],
//! [`IdentityRepository::add_user_role`] and
//! [`TokenRepository::rotate_refresh_token`], are single trait calls so that
//! the backend can apply them in one transaction. Components never read a
//! record, edit it and save it back.

mod memory;

pub use memory::MemoryStore;

use crate::model::{
    AccessTokenRecord, AuthorizationCode, Client, ConsentGrant, RefreshTokenRecord, Role, User,
};
use crate::scope::ScopeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub trait ClientRepository: Send + Sync {
    fn find_client(&self, client_id: &str) -> StorageResult<Option<Client>>;
    fn save_client(&self, client: Client) -> StorageResult<()>;
    fn delete_client(&self, client_id: &str) -> StorageResult<bool>;
}

/// Result of an in-place change to a stored user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserUpdate {
    Applied,
    /// The user already was in the requested state
    Unchanged,
    UserNotFound,
    RoleNotFound,
}

pub trait IdentityRepository: Send + Sync {
    fn find_user(&self, user_id: &str) -> StorageResult<Option<User>>;
    fn save_user(&self, user: User) -> StorageResult<()>;
    fn delete_user(&self, user_id: &str) -> StorageResult<bool>;
    /// Assign an existing role, checking the user and the role in the same step
    fn add_user_role(&self, user_id: &str, role: &str) -> StorageResult<UserUpdate>;
    fn remove_user_role(&self, user_id: &str, role: &str) -> StorageResult<UserUpdate>;
    fn set_user_active(&self, user_id: &str, active: bool) -> StorageResult<UserUpdate>;
    fn find_role(&self, name: &str) -> StorageResult<Option<Role>>;
    fn save_role(&self, role: Role) -> StorageResult<()>;
    /// Removes the role and every assignment of it
    fn delete_role(&self, name: &str) -> StorageResult<bool>;
    fn users_with_role(&self, name: &str) -> StorageResult<Vec<String>>;
}

/// Result of an atomic fetch-and-mark-consumed
#[derive(Debug)]
pub enum CodeConsumption {
    /// The code was unconsumed and is now marked consumed by this call
    Consumed(AuthorizationCode),
    AlreadyConsumed,
    NotFound,
}

pub trait CodeRepository: Send + Sync {
    /// Fails with [`StorageError::Conflict`] if the code already exists
    fn insert_code(&self, code: AuthorizationCode) -> StorageResult<()>;
    /// Look up the code and mark it consumed in a single step. Exactly one of
    /// any number of concurrent callers observes `Consumed`.
    fn consume_code(&self, code: &str) -> StorageResult<CodeConsumption>;
    fn purge_expired_codes(&self, now: i64) -> StorageResult<usize>;
}

/// Result of an atomic refresh-token rotation
#[derive(Debug, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated,
    /// The token had already been rotated; carries the existing successor
    AlreadyRotated { successor: String },
    Revoked,
    NotFound,
}

pub trait TokenRepository: Send + Sync {
    /// Persist a freshly issued access token and, when present, the refresh
    /// token issued with it, as one unit.
    fn insert_token_set(
        &self,
        access: AccessTokenRecord,
        refresh: Option<RefreshTokenRecord>,
    ) -> StorageResult<()>;
    fn find_access_token(&self, jti: &str) -> StorageResult<Option<AccessTokenRecord>>;
    /// Returns true when the token existed and was not already revoked
    fn revoke_access_token(&self, jti: &str) -> StorageResult<bool>;

    fn find_refresh_token(&self, id: &str) -> StorageResult<Option<RefreshTokenRecord>>;
    /// Point `old_id` at `successor` and persist the successor together with
    /// its access token, only if `old_id` is still the active end of its
    /// chain. Nothing is written unless the outcome is `Rotated`.
    fn rotate_refresh_token(
        &self,
        old_id: &str,
        successor: RefreshTokenRecord,
        access: AccessTokenRecord,
    ) -> StorageResult<RotationOutcome>;
    /// Revoke one refresh token and the access tokens issued with it
    fn revoke_refresh_token(&self, id: &str) -> StorageResult<bool>;
    /// Revoke `from_id` and every token reachable from it through
    /// `rotated_to`, plus their access tokens. Returns the revoked ids.
    fn revoke_refresh_chain(&self, from_id: &str) -> StorageResult<Vec<String>>;
    fn refresh_tokens_for(&self, user_id: &str, client_id: &str) -> StorageResult<Vec<String>>;
    /// Drop expired access and refresh tokens, returning how many went
    fn purge_expired_tokens(&self, now: i64) -> StorageResult<usize>;
}

pub trait ConsentRepository: Send + Sync {
    fn find_consent(&self, user_id: &str, client_id: &str) -> StorageResult<Option<ConsentGrant>>;
    /// Add `scope` to the stored grant, creating it when absent, and return
    /// the result. `granted_at` moves to `now`.
    fn merge_consent(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
        now: i64,
    ) -> StorageResult<ConsentGrant>;
    fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool>;
}

/// A backend implementing every repository
pub trait Store:
    ClientRepository + IdentityRepository + CodeRepository + TokenRepository + ConsentRepository
{
}

impl<T> Store for T where
    T: ClientRepository + IdentityRepository + CodeRepository + TokenRepository + ConsentRepository
{
}
