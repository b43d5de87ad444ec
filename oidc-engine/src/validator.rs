//! Validation of authorize and token requests against client registration.
//!
//! Nothing here mutates state. The authorize checks run in a fixed order:
//! the client and its redirect_uri are established first, and only errors
//! found after that point are allowed to travel back through a redirect.

use crate::error::OAuthError;
use crate::model::{Client, GrantType};
use crate::pkce;
use crate::request::{AuthorizeRequest, ClientCredentials, TokenRequest};
use crate::scope::ScopeSet;
use crate::store::{ClientRepository, StorageError};
use log::warn;
use std::sync::Arc;
use url::Url;

/// An authorize request that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    pub client: Client,
    pub redirect_uri: String,
    pub scope: ScopeSet,
    pub state: Option<String>,
    pub code_challenge: String,
    pub nonce: Option<String>,
}

impl ValidatedAuthorization {
    pub fn redirect_target(&self) -> RedirectTarget {
        RedirectTarget {
            redirect_uri: self.redirect_uri.clone(),
            state: self.state.clone(),
        }
    }
}

/// Where a trusted error or success response is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub redirect_uri: String,
    pub state: Option<String>,
}

impl RedirectTarget {
    pub fn error_url(&self, error: &OAuthError) -> Result<String, OAuthError> {
        let description = error.description();
        let mut params = vec![
            ("error", error.error_code()),
            ("error_description", description.as_str()),
        ];
        if let Some(state) = &self.state {
            params.push(("state", state.as_str()));
        }
        append_query(&self.redirect_uri, &params)
    }
}

/// Append `params` to `base`, keeping any query it already has
pub fn append_query(base: &str, params: &[(&str, &str)]) -> Result<String, OAuthError> {
    let mut url = Url::parse(base)
        .map_err(|e| OAuthError::invalid_request(format!("invalid redirect target: {e}")))?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.to_string())
}

/// A rejected authorize request. `redirect` is set only once the client and
/// redirect_uri are trusted; otherwise the error must be shown directly.
#[derive(Debug)]
pub struct AuthorizeError {
    pub error: OAuthError,
    pub redirect: Option<RedirectTarget>,
}

impl AuthorizeError {
    fn direct(error: OAuthError) -> Self {
        Self {
            error,
            redirect: None,
        }
    }

    pub(crate) fn redirected(error: OAuthError, target: &RedirectTarget) -> Self {
        Self {
            error,
            redirect: Some(target.clone()),
        }
    }

    /// The client redirect carrying the error, when the error may be relayed
    pub fn redirect_url(&self) -> Option<String> {
        self.redirect
            .as_ref()
            .and_then(|target| target.error_url(&self.error).ok())
    }
}

impl From<OAuthError> for AuthorizeError {
    fn from(error: OAuthError) -> Self {
        Self::direct(error)
    }
}

impl From<StorageError> for AuthorizeError {
    fn from(error: StorageError) -> Self {
        Self::direct(error.into())
    }
}

/// A token request reduced to the grant it asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: String,
    },
    RefreshToken {
        refresh_token: String,
        scope: Option<ScopeSet>,
    },
}

pub struct RequestValidator {
    clients: Arc<dyn ClientRepository>,
    max_param_length: usize,
}

impl RequestValidator {
    pub fn new(clients: Arc<dyn ClientRepository>, max_param_length: usize) -> Self {
        Self {
            clients,
            max_param_length,
        }
    }

    pub fn validate_authorize(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<ValidatedAuthorization, AuthorizeError> {
        let client_id = non_empty(&request.client_id)
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;
        let client = match self.clients.find_client(client_id)? {
            Some(client) if client.active => client,
            _ => {
                warn!("Authorize request for unknown or inactive client '{}'", client_id);
                return Err(OAuthError::invalid_client("unknown or inactive client").into());
            }
        };

        let redirect_uri = non_empty(&request.redirect_uri)
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
        if !client.is_redirect_uri_registered(redirect_uri) {
            warn!(
                "Unregistered redirect_uri '{}' for client '{}'",
                redirect_uri, client.id
            );
            return Err(OAuthError::invalid_request("redirect_uri is not registered").into());
        }

        // From here on errors go back to the client. An oversized state is
        // dropped rather than echoed.
        let state = request.state.clone();
        let oversized_state = state
            .as_ref()
            .is_some_and(|s| s.len() > self.max_param_length);
        let target = RedirectTarget {
            redirect_uri: redirect_uri.to_string(),
            state: if oversized_state { None } else { state.clone() },
        };
        if oversized_state {
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_request("state is too long"),
                &target,
            ));
        }

        match request.response_type.as_deref() {
            Some("code") => {}
            None | Some("") => {
                return Err(AuthorizeError::redirected(
                    OAuthError::invalid_request("response_type is required"),
                    &target,
                ));
            }
            Some(other) => {
                return Err(AuthorizeError::redirected(
                    OAuthError::UnsupportedResponseType(format!(
                        "response_type '{other}' is not supported"
                    )),
                    &target,
                ));
            }
        }

        let scope = ScopeSet::parse(request.scope.as_deref().unwrap_or_default());
        if scope.is_empty() {
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_scope("scope is required"),
                &target,
            ));
        }
        if !scope.is_subset_of(&client.allowed_scopes) {
            let extra = scope.difference(&client.allowed_scopes);
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_scope(format!("scope not allowed for this client: {extra}")),
                &target,
            ));
        }

        let code_challenge = match non_empty(&request.code_challenge) {
            Some(challenge) => challenge,
            None => {
                return Err(AuthorizeError::redirected(
                    OAuthError::invalid_request("code_challenge is required"),
                    &target,
                ));
            }
        };
        if request.code_challenge_method.as_deref() != Some(pkce::METHOD_S256) {
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_request("code_challenge_method must be S256"),
                &target,
            ));
        }
        if !pkce::is_valid_challenge(code_challenge) {
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_request("code_challenge is malformed"),
                &target,
            ));
        }

        let nonce = request.nonce.clone().filter(|n| !n.is_empty());
        if nonce.as_ref().is_some_and(|n| n.len() > self.max_param_length) {
            return Err(AuthorizeError::redirected(
                OAuthError::invalid_request("nonce is too long"),
                &target,
            ));
        }

        Ok(ValidatedAuthorization {
            redirect_uri: redirect_uri.to_string(),
            scope,
            state: target.state,
            code_challenge: code_challenge.to_string(),
            nonce,
            client,
        })
    }

    /// Authenticate the calling client. Confidential clients must prove
    /// their secret; public clients must not present one.
    pub fn authenticate_client(&self, credentials: &ClientCredentials) -> Result<Client, OAuthError> {
        let failed = || OAuthError::invalid_client("client authentication failed");
        let client = match self.clients.find_client(&credentials.client_id)? {
            Some(client) if client.active => client,
            _ => {
                warn!("Authentication attempt by unknown client '{}'", credentials.client_id);
                return Err(failed());
            }
        };
        let authenticated = match (client.is_confidential(), &credentials.client_secret) {
            (true, Some(secret)) => client.verify_secret(secret),
            (true, None) => false,
            (false, None) => true,
            (false, Some(_)) => false,
        };
        if !authenticated {
            warn!("Client '{}' failed authentication", client.id);
            return Err(failed());
        }
        Ok(client)
    }

    /// Authenticate the client and reduce the request to a typed grant
    pub fn validate_token_request(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<(Client, TokenGrant), OAuthError> {
        let raw_grant = non_empty(&request.grant_type)
            .ok_or_else(|| OAuthError::invalid_request("grant_type is required"))?;
        let grant_type = GrantType::parse(raw_grant).ok_or_else(|| {
            OAuthError::UnsupportedGrantType(format!("grant_type '{raw_grant}' is not supported"))
        })?;

        let client = self.authenticate_client(credentials)?;
        if !client.allows_grant(grant_type) {
            return Err(OAuthError::UnauthorizedClient(format!(
                "client may not use the {} grant",
                grant_type.as_str()
            )));
        }

        let grant = match grant_type {
            GrantType::AuthorizationCode => {
                let code = required(&request.code, "code")?;
                let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
                let code_verifier = required(&request.code_verifier, "code_verifier")?;
                if !client.is_redirect_uri_registered(redirect_uri) {
                    return Err(OAuthError::invalid_request("redirect_uri is not registered"));
                }
                TokenGrant::AuthorizationCode {
                    code: code.to_string(),
                    redirect_uri: redirect_uri.to_string(),
                    code_verifier: code_verifier.to_string(),
                }
            }
            GrantType::RefreshToken => TokenGrant::RefreshToken {
                refresh_token: required(&request.refresh_token, "refresh_token")?.to_string(),
                scope: non_empty(&request.scope).map(ScopeSet::parse),
            },
        };
        Ok((client, grant))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    non_empty(value).ok_or_else(|| OAuthError::invalid_request(format!("{name} is required")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::tests::{spa_client, web_client};
    use crate::store::MemoryStore;

    // RFC 7636 appendix B pair
    pub(crate) const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    pub(crate) const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn validator() -> RequestValidator {
        let store = Arc::new(MemoryStore::new());
        store.save_client(web_client()).unwrap();
        store.save_client(spa_client()).unwrap();
        let mut disabled = web_client();
        disabled.id = "disabled".to_string();
        disabled.active = false;
        store.save_client(disabled).unwrap();
        RequestValidator::new(store, 1024)
    }

    pub(crate) fn authorize_request() -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: Some("web-app".to_string()),
            redirect_uri: Some("https://app.example/callback".to_string()),
            scope: Some("openid profile".to_string()),
            state: Some("xyz".to_string()),
            code_challenge: Some(CHALLENGE.to_string()),
            code_challenge_method: Some("S256".to_string()),
            nonce: Some("n-0S6_WzA2Mj".to_string()),
        }
    }

    #[test]
    fn test_valid_authorize() {
        let validated = validator().validate_authorize(&authorize_request()).unwrap();
        assert_eq!(validated.client.id, "web-app");
        assert_eq!(validated.scope.to_string(), "openid profile");
        assert_eq!(validated.state.as_deref(), Some("xyz"));
        assert_eq!(validated.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
    }

    #[test]
    fn test_unknown_or_inactive_client_is_not_redirected() {
        let validator = validator();
        for client_id in ["nope", "disabled"] {
            let request = AuthorizeRequest {
                client_id: Some(client_id.to_string()),
                ..authorize_request()
            };
            let err = validator.validate_authorize(&request).unwrap_err();
            assert_eq!(err.error.error_code(), "invalid_client");
            assert!(err.redirect_url().is_none());
        }
    }

    #[test]
    fn test_redirect_uri_must_match_exactly() {
        let validator = validator();
        for uri in [
            "https://app.example/callback/extra",
            "https://app.example/callback?next=/",
            "https://evil.example/callback",
            "",
        ] {
            let request = AuthorizeRequest {
                redirect_uri: Some(uri.to_string()),
                ..authorize_request()
            };
            let err = validator.validate_authorize(&request).unwrap_err();
            assert_eq!(err.error.error_code(), "invalid_request");
            assert!(err.redirect.is_none(), "redirected to {uri}");
        }
    }

    #[test]
    fn test_unsupported_response_type_is_redirected() {
        let request = AuthorizeRequest {
            response_type: Some("token".to_string()),
            ..authorize_request()
        };
        let err = validator().validate_authorize(&request).unwrap_err();
        assert_eq!(err.error.error_code(), "unsupported_response_type");
        let url = Url::parse(&err.redirect_url().unwrap()).unwrap();
        assert_eq!(url.path(), "/callback");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("error".to_string(), "unsupported_response_type".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    }

    #[test]
    fn test_scope_must_be_allowed() {
        let validator = validator();
        let request = AuthorizeRequest {
            scope: Some("openid admin".to_string()),
            ..authorize_request()
        };
        let err = validator.validate_authorize(&request).unwrap_err();
        assert_eq!(err.error.error_code(), "invalid_scope");
        assert!(err.redirect.is_some());

        let request = AuthorizeRequest {
            scope: None,
            ..authorize_request()
        };
        let err = validator.validate_authorize(&request).unwrap_err();
        assert_eq!(err.error.error_code(), "invalid_scope");
    }

    #[test]
    fn test_pkce_is_mandatory_and_s256_only() {
        let validator = validator();
        for method in [Some("plain"), Some("s256"), None] {
            let request = AuthorizeRequest {
                code_challenge_method: method.map(str::to_string),
                ..authorize_request()
            };
            let err = validator.validate_authorize(&request).unwrap_err();
            assert_eq!(err.error.error_code(), "invalid_request");
            assert!(err.redirect.is_some());
        }
        let request = AuthorizeRequest {
            code_challenge: None,
            ..authorize_request()
        };
        assert!(validator.validate_authorize(&request).is_err());
    }

    #[test]
    fn test_oversized_passthrough_values() {
        let validator = validator();
        let request = AuthorizeRequest {
            state: Some("s".repeat(1025)),
            ..authorize_request()
        };
        let err = validator.validate_authorize(&request).unwrap_err();
        assert_eq!(err.error.error_code(), "invalid_request");
        assert!(!err.redirect_url().unwrap().contains("state="));

        let request = AuthorizeRequest {
            nonce: Some("n".repeat(1025)),
            ..authorize_request()
        };
        assert!(validator.validate_authorize(&request).is_err());

        let request = AuthorizeRequest {
            state: Some("s".repeat(1024)),
            ..authorize_request()
        };
        assert!(validator.validate_authorize(&request).is_ok());
    }

    #[test]
    fn test_authenticate_client() {
        let validator = validator();
        let ok = validator
            .authenticate_client(&ClientCredentials::new("web-app", Some("s3cret".to_string())))
            .unwrap();
        assert_eq!(ok.id, "web-app");

        for credentials in [
            ClientCredentials::new("web-app", Some("wrong".to_string())),
            ClientCredentials::new("web-app", None),
            ClientCredentials::new("spa", Some("anything".to_string())),
            ClientCredentials::new("disabled", Some("s3cret".to_string())),
            ClientCredentials::new("ghost", None),
        ] {
            let err = validator.authenticate_client(&credentials).unwrap_err();
            assert_eq!(err.error_code(), "invalid_client");
            assert_eq!(err.status_code(), 401);
        }
        assert!(validator
            .authenticate_client(&ClientCredentials::new("spa", None))
            .is_ok());
    }

    #[test]
    fn test_token_request_errors() {
        let validator = validator();
        let web = ClientCredentials::new("web-app", Some("s3cret".to_string()));

        let err = validator
            .validate_token_request(&TokenRequest::default(), &web)
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let request = TokenRequest {
            grant_type: Some("password".to_string()),
            ..Default::default()
        };
        let err = validator.validate_token_request(&request, &web).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_grant_type");

        // The SPA is registered for authorization_code only
        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some("r".to_string()),
            ..Default::default()
        };
        let err = validator
            .validate_token_request(&request, &ClientCredentials::new("spa", None))
            .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized_client");

        let request = TokenRequest {
            grant_type: Some("authorization_code".to_string()),
            code: Some("c".to_string()),
            redirect_uri: Some("https://app.example/callback".to_string()),
            ..Default::default()
        };
        let err = validator.validate_token_request(&request, &web).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[test]
    fn test_token_request_grants() {
        let validator = validator();
        let web = ClientCredentials::new("web-app", Some("s3cret".to_string()));
        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some("r1".to_string()),
            scope: Some("openid".to_string()),
            ..Default::default()
        };
        let (client, grant) = validator.validate_token_request(&request, &web).unwrap();
        assert_eq!(client.id, "web-app");
        assert_eq!(
            grant,
            TokenGrant::RefreshToken {
                refresh_token: "r1".to_string(),
                scope: Some(ScopeSet::parse("openid")),
            }
        );
    }
}
