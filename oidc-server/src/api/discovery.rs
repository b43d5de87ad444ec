//! OpenID Provider metadata and the published verification keys

use crate::headers::presets;
use crate::openapi::DISCOVERY_TAG;
use crate::state::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use oidc_engine::crypto::Jwks;
use oidc_engine::pkce::METHOD_S256;
use serde::Serialize;
use utoipa::ToSchema;

/// Seconds clients may cache the JWKS. Retired keys stay published for
/// longer than this, so a cached copy never misses a live key.
const JWKS_MAX_AGE: u32 = 300;

/// OpenID Connect Discovery 1.0 provider metadata
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub scopes_supported: Vec<&'static str>,
    pub claims_supported: Vec<&'static str>,
}

impl ProviderMetadata {
    fn new(state: &AppState) -> Self {
        let config = &state.config;
        Self {
            issuer: state.server.issuer().to_string(),
            authorization_endpoint: config.endpoint("/authorize"),
            token_endpoint: config.endpoint("/token"),
            userinfo_endpoint: config.endpoint("/userinfo"),
            jwks_uri: config.endpoint("/.well-known/jwks.json"),
            revocation_endpoint: config.endpoint("/revoke"),
            introspection_endpoint: config.endpoint("/introspect"),
            response_types_supported: vec!["code"],
            grant_types_supported: vec!["authorization_code", "refresh_token"],
            subject_types_supported: vec!["public"],
            id_token_signing_alg_values_supported: vec!["RS256"],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
            code_challenge_methods_supported: vec![METHOD_S256],
            scopes_supported: vec!["openid", "profile", "email"],
            claims_supported: vec![
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "nonce",
                "name",
                "preferred_username",
                "given_name",
                "family_name",
                "email",
                "email_verified",
            ],
        }
    }
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = DISCOVERY_TAG,
    responses(
        (status = 200, description = "Provider metadata", body = ProviderMetadata)
    )
)]
pub(crate) async fn openid_configuration(State(state): State<AppState>) -> Response {
    let mut response = Json(ProviderMetadata::new(&state)).into_response();
    presets::no_store().apply(&mut response);
    response
}

#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = DISCOVERY_TAG,
    responses(
        (status = 200, description = "Public keys that verify issued tokens", body = Jwks)
    )
)]
pub(crate) async fn jwks(State(state): State<AppState>) -> Response {
    let mut response = Json(state.server.jwks()).into_response();
    presets::public_cache(JWKS_MAX_AGE).apply(&mut response);
    response
}

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .route("/.well-known/jwks.json", get(jwks))
}
