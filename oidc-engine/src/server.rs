//! The authorization server: the six components wired into the protocol
//! flows of the authorize, consent, token, revocation, introspection,
//! userinfo and permission-check endpoints.

use crate::clock::Clock;
use crate::codes::AuthorizationCodeStore;
use crate::consent::{ConsentDecision, ConsentManager, ConsentStatus, ScopeDescription, describe_scope};
use crate::crypto::{Jwks, KeyStore};
use crate::error::OAuthError;
use crate::model::{Client, Role, User};
use crate::rbac::{PermissionDecision, PermissionEvaluator, PermissionSet};
use crate::request::{AuthorizeRequest, ClientCredentials, TokenHintRequest, TokenRequest};
use crate::scope::ScopeSet;
use crate::store::{ClientRepository, IdentityRepository};
use crate::tokens::{AccessClaims, Introspection, TokenService, TokenSet, UserInfo};
use crate::validator::{
    AuthorizeError, RequestValidator, TokenGrant, ValidatedAuthorization, append_query,
};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Permission a caller's access token must carry to use the permission check
pub const CHECK_PERMISSION: &str = "permissions:check";

/// Successful authorization, delivered to the client's redirect_uri
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub redirect_uri: String,
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizationResponse {
    pub fn redirect_url(&self) -> Result<String, OAuthError> {
        let mut params = vec![("code", self.code.as_str())];
        if let Some(state) = &self.state {
            params.push(("state", state.as_str()));
        }
        append_query(&self.redirect_uri, &params)
    }
}

#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// No authenticated user; hand over to the login collaborator
    LoginRequired(ValidatedAuthorization),
    /// The user has to approve at least `missing` first
    ConsentRequired {
        authorization: ValidatedAuthorization,
        missing: ScopeSet,
    },
    Issued(AuthorizationResponse),
}

/// What the consent screen shows
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConsentView {
    pub client_id: String,
    pub client_name: String,
    pub scopes: Vec<ScopeDescription>,
    /// Scopes the user approved for this client before
    pub previously_granted: Vec<String>,
}

/// Does `user_id` hold `action` on `resource`?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub user_id: String,
    pub resource: String,
    pub action: String,
}

impl PermissionCheck {
    pub fn required_permission(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

/// Counts of records removed by one [`AuthorizationServer::sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub codes: usize,
    pub tokens: usize,
    pub keys: usize,
}

/// Built by [`crate::builder::AuthorizationServerBuilder`]
pub struct AuthorizationServer {
    pub(crate) validator: RequestValidator,
    pub(crate) consents: ConsentManager,
    pub(crate) codes: AuthorizationCodeStore,
    pub(crate) tokens: TokenService,
    pub(crate) permissions: Arc<PermissionEvaluator>,
    pub(crate) clients: Arc<dyn ClientRepository>,
    pub(crate) identities: Arc<dyn IdentityRepository>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl AuthorizationServer {
    pub fn issuer(&self) -> &str {
        self.tokens.signer().issuer()
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        self.tokens.signer().key_store()
    }

    pub fn jwks(&self) -> Jwks {
        self.key_store().jwks(self.clock.now())
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    pub fn consents(&self) -> &ConsentManager {
        &self.consents
    }

    /// Handle an authorize request for the user authenticated by the
    /// surrounding session, if any.
    pub fn authorize(
        &self,
        request: &AuthorizeRequest,
        user_id: Option<&str>,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        let authorization = self.validator.validate_authorize(request)?;
        let Some(user_id) = user_id else {
            return Ok(AuthorizeOutcome::LoginRequired(authorization));
        };
        self.ensure_active_user(user_id, &authorization)?;

        match self
            .consents
            .check(user_id, &authorization.client, &authorization.scope)
            .map_err(|e| AuthorizeError::redirected(e, &authorization.redirect_target()))?
        {
            ConsentStatus::Granted => Ok(AuthorizeOutcome::Issued(
                self.issue_code(user_id, &authorization)?,
            )),
            ConsentStatus::NeedsConsent { missing } => Ok(AuthorizeOutcome::ConsentRequired {
                authorization,
                missing,
            }),
        }
    }

    /// Data for the consent screen of a pending authorize request
    pub fn consent_view(
        &self,
        request: &AuthorizeRequest,
        user_id: &str,
    ) -> Result<ConsentView, AuthorizeError> {
        let authorization = self.validator.validate_authorize(request)?;
        let previously_granted = self
            .consents
            .find(user_id, &authorization.client.id)?
            .map(|grant| grant.scope.iter().map(str::to_string).collect())
            .unwrap_or_default();
        Ok(ConsentView {
            client_id: authorization.client.id.clone(),
            client_name: authorization.client.name.clone(),
            scopes: authorization.scope.iter().map(describe_scope).collect(),
            previously_granted,
        })
    }

    /// Apply the user's answer on the consent screen. The original authorize
    /// parameters are validated again since they round-tripped through the
    /// browser.
    pub fn decide_consent(
        &self,
        request: &AuthorizeRequest,
        user_id: &str,
        decision: ConsentDecision,
    ) -> Result<AuthorizationResponse, AuthorizeError> {
        let authorization = self.validator.validate_authorize(request)?;
        self.ensure_active_user(user_id, &authorization)?;
        let target = authorization.redirect_target();
        self.consents
            .record(user_id, &authorization.client.id, &authorization.scope, decision)
            .map_err(|e| AuthorizeError::redirected(e, &target))?;
        self.issue_code(user_id, &authorization)
    }

    fn ensure_active_user(
        &self,
        user_id: &str,
        authorization: &ValidatedAuthorization,
    ) -> Result<(), AuthorizeError> {
        let target = authorization.redirect_target();
        match self.identities.find_user(user_id)? {
            Some(user) if user.active => Ok(()),
            _ => {
                warn!("Authorize request for unknown or inactive user '{}'", user_id);
                Err(AuthorizeError::redirected(
                    OAuthError::AccessDenied("the user account is not active".to_string()),
                    &target,
                ))
            }
        }
    }

    fn issue_code(
        &self,
        user_id: &str,
        authorization: &ValidatedAuthorization,
    ) -> Result<AuthorizationResponse, AuthorizeError> {
        let target = authorization.redirect_target();
        let code = self
            .codes
            .issue(user_id, authorization)
            .map_err(|e| AuthorizeError::redirected(e, &target))?;
        Ok(AuthorizationResponse {
            redirect_uri: target.redirect_uri,
            code,
            state: target.state,
        })
    }

    /// Token endpoint: authenticate the client and run the requested grant
    pub fn token(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<TokenSet, OAuthError> {
        let (client, grant) = self.validator.validate_token_request(request, credentials)?;
        match grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => self.exchange(&client, &code, &redirect_uri, &code_verifier),
            TokenGrant::RefreshToken {
                refresh_token,
                scope,
            } => self.refresh(&client, &refresh_token, scope.as_ref()),
        }
    }

    /// Redeem an authorization code for a token set
    pub fn exchange(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, OAuthError> {
        let record = self
            .codes
            .consume(code, &client.id, redirect_uri, code_verifier)?;
        let user = self.tokens.active_user(&record.user_id)?;
        self.tokens
            .issue_token_set(&user, client, &record.scope, record.nonce.as_deref())
    }

    pub fn refresh(
        &self,
        client: &Client,
        refresh_token: &str,
        scope: Option<&ScopeSet>,
    ) -> Result<TokenSet, OAuthError> {
        self.tokens.refresh(refresh_token, client, scope)
    }

    /// Revocation endpoint. Succeeds for any token once the client is
    /// authenticated.
    pub fn revoke(
        &self,
        request: &TokenHintRequest,
        credentials: &ClientCredentials,
    ) -> Result<(), OAuthError> {
        let client = self.validator.authenticate_client(credentials)?;
        let Some(token) = request.token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(OAuthError::invalid_request("token is required"));
        };
        self.tokens.revoke(token, request.hint(), &client.id)
    }

    pub fn introspect(
        &self,
        request: &TokenHintRequest,
        credentials: &ClientCredentials,
    ) -> Result<Introspection, OAuthError> {
        self.validator.authenticate_client(credentials)?;
        let Some(token) = request.token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(OAuthError::invalid_request("token is required"));
        };
        self.tokens.introspect(token, request.hint())
    }

    pub fn authenticate(&self, bearer: &str) -> Result<AccessClaims, OAuthError> {
        self.tokens.authenticate(bearer)
    }

    pub fn userinfo(&self, bearer: &str) -> Result<UserInfo, OAuthError> {
        self.tokens.userinfo(bearer)
    }

    /// Evaluate `check` on behalf of `caller`, whose access token must carry
    /// [`CHECK_PERMISSION`]. The subject's permissions are resolved live
    /// rather than taken from any token.
    pub fn check_permission(
        &self,
        caller: &AccessClaims,
        check: &PermissionCheck,
    ) -> Result<PermissionDecision, OAuthError> {
        let caller_permissions: PermissionSet =
            caller.permissions.iter().map(String::as_str).collect();
        if !caller_permissions.grants(CHECK_PERMISSION) {
            warn!(
                "Caller '{}' lacks '{}' for a permission check",
                caller.sub, CHECK_PERMISSION
            );
            return Err(OAuthError::Forbidden(format!(
                "the caller requires '{CHECK_PERMISSION}'"
            )));
        }
        self.permissions
            .decide(&check.user_id, &check.required_permission())
    }

    /// Purge expired codes, tokens and retired keys
    pub fn sweep(&self) -> Result<SweepReport, OAuthError> {
        let report = SweepReport {
            codes: self.codes.purge_expired()?,
            tokens: self.tokens.purge_expired()?,
            keys: self.key_store().prune(self.clock.now()),
        };
        if report != SweepReport::default() {
            info!(
                "Swept {} codes, {} tokens and {} keys",
                report.codes, report.tokens, report.keys
            );
        }
        Ok(report)
    }

    pub fn find_client(&self, client_id: &str) -> Result<Option<Client>, OAuthError> {
        Ok(self.clients.find_client(client_id)?)
    }

    pub fn register_client(&self, client: Client) -> Result<(), OAuthError> {
        info!("Registered client '{}'", client.id);
        Ok(self.clients.save_client(client)?)
    }

    /// Remove a registration. Codes and tokens already issued to the client
    /// can no longer be redeemed, since it cannot authenticate.
    pub fn delete_client(&self, client_id: &str) -> Result<bool, OAuthError> {
        let existed = self.clients.delete_client(client_id)?;
        if existed {
            info!("Deleted client '{}'", client_id);
        }
        Ok(existed)
    }

    pub fn find_user(&self, user_id: &str) -> Result<Option<User>, OAuthError> {
        Ok(self.identities.find_user(user_id)?)
    }

    /// Create or replace a user. Their cached permissions are dropped.
    pub fn save_user(&self, user: User) -> Result<(), OAuthError> {
        let user_id = user.id.clone();
        self.identities.save_user(user)?;
        self.permissions.invalidate_users(&[user_id]);
        Ok(())
    }

    pub fn delete_user(&self, user_id: &str) -> Result<bool, OAuthError> {
        self.permissions.delete_user(user_id)
    }

    pub fn save_role(&self, role: Role) -> Result<(), OAuthError> {
        let name = role.name.clone();
        let permissions = role.permissions.clone();
        if self.identities.find_role(&name)?.is_some() {
            return self.permissions.set_role_permissions(&name, permissions);
        }
        Ok(self.identities.save_role(role)?)
    }
}
