//! Access, refresh and ID token lifecycle.
//!
//! Access and ID tokens are RS256 JWTs. Every access token also has a
//! server-side record keyed by its `jti`, which is what revocation and
//! introspection consult. Refresh tokens are opaque random strings stored by
//! digest; each rotation links the old record to its successor, forming a
//! one-directional chain whose members share a `family_id`.

use crate::clock::Clock;
use crate::crypto::{ExpiringClaims, TokenSigner, VerifyError, random_token, sha256_hex};
use crate::error::OAuthError;
use crate::model::{AccessTokenRecord, Client, GrantType, RefreshTokenRecord, User, UserProfile};
use crate::rbac::PermissionEvaluator;
use crate::request::TokenTypeHint;
use crate::scope::ScopeSet;
use crate::store::{IdentityRepository, RotationOutcome, StorageError, TokenRepository};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// How much of a rotation chain a replayed refresh token takes down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Revoke every token of the chain, including the active descendant
    #[default]
    RevokeChain,
    /// Revoke only the token the replayed one was rotated into
    RevokeDescendant,
}

impl FromStr for ReplayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chain" => Ok(Self::RevokeChain),
            "descendant" => Ok(Self::RevokeDescendant),
            other => Err(format!(
                "unknown replay policy '{other}', expected 'chain' or 'descendant'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_token_ttl: i64,
    pub refresh_token_ttl: i64,
    pub id_token_ttl: i64,
    pub replay_policy: ReplayPolicy,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: 3_600,
            refresh_token_ttl: 2_592_000,
            id_token_ttl: 3_600,
            replay_policy: ReplayPolicy::default(),
        }
    }
}

/// Claims of a signed access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub client_id: String,
    pub scope: String,
    /// Snapshot of the subject's permissions at issuance
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl ExpiringClaims for AccessClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// Profile claims released for the `profile` and `email` scopes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProfileClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl ProfileClaims {
    pub fn for_scope(profile: &UserProfile, scope: &ScopeSet) -> Self {
        let mut claims = Self::default();
        if scope.contains("profile") {
            claims.name = profile.name.clone();
            claims.preferred_username = profile.preferred_username.clone();
            claims.given_name = profile.given_name.clone();
            claims.family_name = profile.family_name.clone();
        }
        if scope.contains("email") {
            claims.email = profile.email.clone();
            claims.email_verified = profile.email_verified;
        }
        claims
    }
}

/// Claims of an OpenID Connect ID token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileClaims,
}

impl ExpiringClaims for IdTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// Successful token endpoint response (RFC 6749 section 5.1)
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Introspection response (RFC 7662). Only `active` is set for tokens that
/// are not active.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Introspection {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// OIDC userinfo response
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserInfo {
    pub sub: String,
    #[serde(flatten)]
    pub profile: ProfileClaims,
}

pub struct TokenService {
    signer: TokenSigner,
    tokens: Arc<dyn TokenRepository>,
    identities: Arc<dyn IdentityRepository>,
    permissions: Arc<PermissionEvaluator>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
}

/// The records and signed values for one issuance, not yet persisted
struct PreparedTokens {
    set: TokenSet,
    access: AccessTokenRecord,
    refresh: Option<RefreshTokenRecord>,
}

impl TokenService {
    pub fn new(
        signer: TokenSigner,
        tokens: Arc<dyn TokenRepository>,
        identities: Arc<dyn IdentityRepository>,
        permissions: Arc<PermissionEvaluator>,
        clock: Arc<dyn Clock>,
        config: TokenConfig,
    ) -> Self {
        Self {
            signer,
            tokens,
            identities,
            permissions,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Issue a fresh token set for an authorization. The refresh token is
    /// included when the client may use the refresh grant and the ID token
    /// when `openid` was granted.
    pub fn issue_token_set(
        &self,
        user: &User,
        client: &Client,
        scope: &ScopeSet,
        nonce: Option<&str>,
    ) -> Result<TokenSet, OAuthError> {
        let prepared = self.prepare(user, client, scope, nonce, None)?;
        self.tokens
            .insert_token_set(prepared.access, prepared.refresh)?;
        info!(
            "Issued token set for user '{}' via client '{}' with scope '{}'",
            user.id, client.id, scope
        );
        Ok(prepared.set)
    }

    fn prepare(
        &self,
        user: &User,
        client: &Client,
        scope: &ScopeSet,
        nonce: Option<&str>,
        family_id: Option<&str>,
    ) -> Result<PreparedTokens, OAuthError> {
        let now = self.clock.now();
        let permissions = self.permissions.resolve(&user.id)?.to_vec();
        let access_ttl = client.access_token_ttl.unwrap_or(self.config.access_token_ttl);
        let jti = random_token();

        let refresh = if client.allows_grant(GrantType::RefreshToken) {
            let value = random_token();
            let id = sha256_hex(&value);
            let record = RefreshTokenRecord {
                family_id: family_id.map_or_else(|| id.clone(), str::to_string),
                id,
                user_id: user.id.clone(),
                client_id: client.id.clone(),
                scope: scope.clone(),
                issued_at: now,
                expires_at: now
                    + client
                        .refresh_token_ttl
                        .unwrap_or(self.config.refresh_token_ttl),
                revoked: false,
                rotated_to: None,
            };
            Some((value, record))
        } else {
            None
        };

        let access_token = self.signer.sign(&AccessClaims {
            iss: self.signer.issuer().to_string(),
            sub: user.id.clone(),
            client_id: client.id.clone(),
            scope: scope.to_string(),
            permissions: permissions.clone(),
            iat: now,
            exp: now + access_ttl,
            jti: jti.clone(),
        })?;

        let id_token = if scope.contains("openid") {
            Some(self.signer.sign(&IdTokenClaims {
                iss: self.signer.issuer().to_string(),
                sub: user.id.clone(),
                aud: client.id.clone(),
                exp: now + self.config.id_token_ttl,
                iat: now,
                nonce: nonce.map(str::to_string),
                profile: ProfileClaims::for_scope(&user.profile, scope),
            })?)
        } else {
            None
        };

        let access = AccessTokenRecord {
            jti,
            user_id: user.id.clone(),
            client_id: client.id.clone(),
            scope: scope.clone(),
            permissions,
            issued_at: now,
            expires_at: now + access_ttl,
            revoked: false,
            refresh_token_id: refresh.as_ref().map(|(_, r)| r.id.clone()),
        };
        let (refresh_value, refresh) = match refresh {
            Some((value, record)) => (Some(value), Some(record)),
            None => (None, None),
        };

        Ok(PreparedTokens {
            set: TokenSet {
                access_token,
                token_type: TOKEN_TYPE_BEARER.to_string(),
                expires_in: access_ttl,
                refresh_token: refresh_value,
                id_token,
                scope: scope.to_string(),
            },
            access,
            refresh,
        })
    }

    /// The user behind a grant, which must still exist and be active
    pub fn active_user(&self, user_id: &str) -> Result<User, OAuthError> {
        match self.identities.find_user(user_id)? {
            Some(user) if user.active => Ok(user),
            _ => Err(OAuthError::invalid_grant("the resource owner is no longer active")),
        }
    }

    /// Rotate `refresh_token` into a new token set, optionally narrowing
    /// the scope. Presenting a token that was already rotated is treated as
    /// theft and contained according to the replay policy.
    pub fn refresh(
        &self,
        refresh_token: &str,
        client: &Client,
        requested_scope: Option<&ScopeSet>,
    ) -> Result<TokenSet, OAuthError> {
        let now = self.clock.now();
        let invalid = || OAuthError::invalid_grant("refresh token is invalid");

        let record = self
            .tokens
            .find_refresh_token(&sha256_hex(refresh_token))?
            .ok_or_else(invalid)?;
        if record.client_id != client.id {
            warn!(
                "Client '{}' presented a refresh token issued to '{}'",
                client.id, record.client_id
            );
            return Err(invalid());
        }
        if let Some(successor) = record.rotated_to.clone() {
            self.contain_replay(&record, &successor);
            return Err(invalid());
        }
        if record.revoked || record.is_expired(now) {
            return Err(invalid());
        }

        let scope = match requested_scope {
            Some(requested) if !requested.is_subset_of(&record.scope) => {
                return Err(OAuthError::invalid_scope(
                    "requested scope exceeds the original grant",
                ));
            }
            Some(requested) if !requested.is_empty() => requested.clone(),
            _ => record.scope.clone(),
        };

        let user = self.active_user(&record.user_id)?;
        let prepared = self.prepare(&user, client, &scope, None, Some(&record.family_id))?;
        let Some(successor) = prepared.refresh else {
            return Err(OAuthError::UnauthorizedClient(
                "client may not use the refresh_token grant".to_string(),
            ));
        };
        let successor_id = successor.id.clone();

        match self
            .tokens
            .rotate_refresh_token(&record.id, successor, prepared.access)?
        {
            RotationOutcome::Rotated => {
                info!(
                    "Rotated refresh token for user '{}' via client '{}'",
                    record.user_id, client.id
                );
                debug!("Refresh chain {} advanced to {}", short(&record.family_id), short(&successor_id));
                Ok(prepared.set)
            }
            RotationOutcome::AlreadyRotated { successor } => {
                // Lost a concurrent rotation: indistinguishable from replay
                self.contain_replay(&record, &successor);
                Err(invalid())
            }
            RotationOutcome::Revoked | RotationOutcome::NotFound => Err(invalid()),
        }
    }

    fn contain_replay(&self, record: &RefreshTokenRecord, successor: &str) {
        warn!(
            target: "security",
            "refresh token replay detected for user '{}' via client '{}' (chain {}), policy {:?}",
            record.user_id,
            record.client_id,
            short(&record.family_id),
            self.config.replay_policy
        );
        let outcome = match self.config.replay_policy {
            ReplayPolicy::RevokeChain => self.revoke_chain(record),
            ReplayPolicy::RevokeDescendant => self
                .tokens
                .revoke_refresh_token(successor)
                .map(usize::from),
        };
        match outcome {
            Ok(count) => warn!(
                target: "security",
                "revoked {} refresh tokens of chain {}",
                count,
                short(&record.family_id)
            ),
            Err(e) => error!(
                target: "security",
                "failed to revoke refresh chain {}: {}",
                short(&record.family_id),
                e
            ),
        }
    }

    fn revoke_chain(&self, record: &RefreshTokenRecord) -> Result<usize, StorageError> {
        let revoked = self.tokens.revoke_refresh_chain(&record.family_id)?;
        if !revoked.is_empty() {
            return Ok(revoked.len());
        }
        // The chain root may already have been purged
        Ok(self.tokens.revoke_refresh_chain(&record.id)?.len())
    }

    /// Revoke an access or refresh token held by `client_id` (RFC 7009).
    ///
    /// Unknown, foreign, malformed and already revoked tokens are silently
    /// accepted. Only a storage failure is reported.
    pub fn revoke(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        client_id: &str,
    ) -> Result<(), OAuthError> {
        let revoked = match hint {
            Some(TokenTypeHint::AccessToken) => {
                self.revoke_access(token, client_id)? || self.revoke_refresh(token, client_id)?
            }
            _ => self.revoke_refresh(token, client_id)? || self.revoke_access(token, client_id)?,
        };
        debug!("Revocation request from client '{}' matched a token: {}", client_id, revoked);
        Ok(())
    }

    fn revoke_access(&self, token: &str, client_id: &str) -> Result<bool, OAuthError> {
        let Ok(claims) = self.signer.verify::<AccessClaims>(token, None) else {
            return Ok(false);
        };
        if claims.client_id != client_id {
            return Ok(false);
        }
        if self.tokens.revoke_access_token(&claims.jti)? {
            info!("Revoked access token {} of client '{}'", short(&claims.jti), client_id);
        }
        Ok(true)
    }

    fn revoke_refresh(&self, token: &str, client_id: &str) -> Result<bool, OAuthError> {
        let id = sha256_hex(token);
        match self.tokens.find_refresh_token(&id)? {
            Some(record) if record.client_id == client_id => {
                if self.tokens.revoke_refresh_token(&id)? {
                    info!(
                        "Revoked refresh token of user '{}' via client '{}'",
                        record.user_id, client_id
                    );
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Describe a token (RFC 7662). Anything revoked, expired, superseded or
    /// unknown is reported as inactive with no further detail.
    pub fn introspect(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> Result<Introspection, OAuthError> {
        let found = match hint {
            Some(TokenTypeHint::RefreshToken) => match self.introspect_refresh(token)? {
                Some(found) => Some(found),
                None => self.introspect_access(token)?,
            },
            _ => match self.introspect_access(token)? {
                Some(found) => Some(found),
                None => self.introspect_refresh(token)?,
            },
        };
        Ok(found.unwrap_or_else(Introspection::inactive))
    }

    fn introspect_access(&self, token: &str) -> Result<Option<Introspection>, OAuthError> {
        let Ok(claims) = self.signer.verify::<AccessClaims>(token, None) else {
            return Ok(None);
        };
        Ok(self
            .tokens
            .find_access_token(&claims.jti)?
            .filter(|record| record.is_active(self.clock.now()))
            .map(|record| Introspection {
                active: true,
                scope: Some(record.scope.to_string()),
                client_id: Some(record.client_id),
                sub: Some(record.user_id),
                exp: Some(record.expires_at),
                iat: Some(record.issued_at),
            }))
    }

    fn introspect_refresh(&self, token: &str) -> Result<Option<Introspection>, OAuthError> {
        Ok(self
            .tokens
            .find_refresh_token(&sha256_hex(token))?
            .filter(|record| record.is_active(self.clock.now()))
            .map(|record| Introspection {
                active: true,
                scope: Some(record.scope.to_string()),
                client_id: Some(record.client_id),
                sub: Some(record.user_id),
                exp: Some(record.expires_at),
                iat: Some(record.issued_at),
            }))
    }

    /// Validate a bearer access token presented to a protected endpoint
    pub fn authenticate(&self, bearer: &str) -> Result<AccessClaims, OAuthError> {
        let claims = self
            .signer
            .verify::<AccessClaims>(bearer, None)
            .map_err(|e| match e {
                VerifyError::Expired => OAuthError::InvalidToken("access token expired".to_string()),
                _ => OAuthError::InvalidToken("access token is invalid".to_string()),
            })?;
        match self.tokens.find_access_token(&claims.jti)? {
            Some(record) if record.is_active(self.clock.now()) => Ok(claims),
            _ => Err(OAuthError::InvalidToken(
                "access token is revoked or unknown".to_string(),
            )),
        }
    }

    /// Claims about the token's subject, released according to its scope
    pub fn userinfo(&self, bearer: &str) -> Result<UserInfo, OAuthError> {
        let claims = self.authenticate(bearer)?;
        let scope = ScopeSet::parse(&claims.scope);
        if !scope.contains("openid") {
            return Err(OAuthError::Forbidden(
                "the access token lacks the openid scope".to_string(),
            ));
        }
        let user = match self.identities.find_user(&claims.sub)? {
            Some(user) if user.active => user,
            _ => return Err(OAuthError::InvalidToken("subject is no longer active".to_string())),
        };
        Ok(UserInfo {
            sub: user.id,
            profile: ProfileClaims::for_scope(&user.profile, &scope),
        })
    }

    pub fn purge_expired(&self) -> Result<usize, OAuthError> {
        Ok(self.tokens.purge_expired_tokens(self.clock.now())?)
    }
}

/// Leading characters of an identifier, enough to correlate log lines
fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
