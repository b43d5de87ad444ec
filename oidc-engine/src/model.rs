//! Records the engine reads and writes through the [`crate::store`] traits.

use crate::crypto::sha256_hex;
use crate::scope::ScopeSet;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
}

fn default_true() -> bool {
    true
}

/// A registered client application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: ScopeSet,
    pub client_type: ClientType,
    /// SHA-256 hex digest of the client secret. Confidential clients only.
    #[serde(default)]
    pub secret_hash: Option<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,
    /// Kept for the record; PKCE is enforced for every client regardless.
    #[serde(default = "default_true")]
    pub require_pkce: bool,
    /// Ask for consent on every authorization, even when already granted
    #[serde(default)]
    pub require_consent: bool,
    #[serde(default)]
    pub access_token_ttl: Option<i64>,
    #[serde(default)]
    pub refresh_token_ttl: Option<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Client {
    /// Exact string comparison. No prefix, case folding or normalisation.
    pub fn is_redirect_uri_registered(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }

    pub fn verify_secret(&self, secret: &str) -> bool {
        match &self.secret_hash {
            Some(expected) => sha256_hex(secret).as_bytes().ct_eq(expected.as_bytes()).into(),
            None => false,
        }
    }
}

/// Standard OIDC profile claims, released according to granted scopes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: ScopeSet,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub nonce: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed: bool,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Server-side record of a signed access token, keyed by `jti`
#[derive(Debug, Clone)]
pub struct AccessTokenRecord {
    pub jti: String,
    pub user_id: String,
    pub client_id: String,
    pub scope: ScopeSet,
    pub permissions: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    /// The refresh token issued alongside, if any
    pub refresh_token_id: Option<String>,
}

impl AccessTokenRecord {
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Server-side record of an opaque refresh token.
///
/// `id` is the SHA-256 hex digest of the token value; the value itself is
/// never stored. Rotation links a record to its successor through
/// `rotated_to`, and every record of a chain shares the `family_id` of the
/// first token, which makes the chain root reachable from any member.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub family_id: String,
    pub user_id: String,
    pub client_id: String,
    pub scope: ScopeSet,
    pub issued_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub rotated_to: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Neither revoked, expired nor superseded
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && self.rotated_to.is_none() && !self.is_expired(now)
    }
}

#[derive(Debug, Clone)]
pub struct ConsentGrant {
    pub user_id: String,
    pub client_id: String,
    pub scope: ScopeSet,
    pub granted_at: i64,
}
