//! Raw protocol requests as they arrive from the HTTP boundary.
//!
//! Every field is optional here; [`crate::validator::RequestValidator`]
//! turns these into typed, validated values or a protocol error.

use crate::error::OAuthError;
use serde::{Deserialize, Serialize};

/// Authorization endpoint parameters (RFC 6749 section 4.1.1, RFC 7636, OIDC)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct AuthorizeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl AuthorizeRequest {
    /// The parameters that are set, in protocol order, for re-encoding into
    /// a consent or login URL.
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("response_type", &self.response_type),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
            ("scope", &self.scope),
            ("state", &self.state),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
            ("nonce", &self.nonce),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

/// Token endpoint form body
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Body of revocation (RFC 7009) and introspection (RFC 7662) requests
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenHintRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl TokenHintRequest {
    pub fn hint(&self) -> Option<TokenTypeHint> {
        self.token_type_hint.as_deref().and_then(TokenTypeHint::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Unknown hints are ignored rather than rejected
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "access_token" => Some(Self::AccessToken),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

/// Client credentials, from HTTP Basic or the request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Combine HTTP Basic credentials with the body's `client_id` and
    /// `client_secret`. A client may use only one authentication method.
    pub fn resolve(
        basic: Option<ClientCredentials>,
        body_client_id: Option<&str>,
        body_client_secret: Option<&str>,
    ) -> Result<Self, OAuthError> {
        match (basic, body_client_id) {
            (Some(_), _) if body_client_secret.is_some() => Err(OAuthError::invalid_request(
                "multiple client authentication methods used",
            )),
            (Some(basic), Some(id)) if id != basic.client_id => Err(OAuthError::invalid_request(
                "client_id does not match the authenticated client",
            )),
            (Some(basic), _) => Ok(basic),
            (None, Some(id)) if !id.is_empty() => Ok(Self::new(
                id,
                body_client_secret.map(str::to_string),
            )),
            (None, _) => Err(OAuthError::invalid_client("client authentication required")),
        }
    }
}
