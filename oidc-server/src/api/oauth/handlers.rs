//! Authorization, token, revocation and introspection endpoints

use crate::api::oauth::client_auth::client_credentials;
use crate::errors::{ApiError, ErrorBody};
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::FormRejection, Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use log::{debug, warn};
use oidc_engine::request::{AuthorizeRequest, TokenHintRequest, TokenRequest};
use oidc_engine::tokens::{Introspection, TokenSet};
use oidc_engine::validator::AuthorizeError;
use oidc_engine::AuthorizeOutcome;
use serde::Serialize;

/// The user id the fronting session layer vouches for, if any
pub(super) fn session_user(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(state.config.session_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}

/// Relay through the client's redirect_uri when it is trusted, otherwise
/// answer directly with 400
pub(super) fn authorize_error(err: AuthorizeError) -> Response {
    if let Some(url) = err.redirect_url() {
        debug!("Authorize request failed with {}, redirecting", err.error.error_code());
        return Redirect::to(&url).into_response();
    }
    warn!("Rejected authorize request: {}", err.error);
    let mut api_error = ApiError::from(err.error);
    if api_error.status_code == StatusCode::UNAUTHORIZED {
        api_error.status_code = StatusCode::BAD_REQUEST;
        api_error.challenge = None;
    }
    api_error.into_response()
}

pub(crate) fn no_store_json<T: Serialize>(body: T) -> Response {
    let mut response = Json(body).into_response();
    presets::no_store().apply(&mut response);
    response
}

fn form_rejection(rejection: FormRejection) -> ApiError {
    ApiError::invalid_request(format!("malformed request body: {}", rejection.body_text()))
}

fn login_redirect(state: &AppState, request: &AuthorizeRequest) -> Result<Response, ApiError> {
    let mut return_to = url::Url::parse(&state.config.endpoint("/authorize"))
        .map_err(ApiError::internal)?;
    return_to.query_pairs_mut().extend_pairs(request.query_pairs());

    let mut login = state.config.login_endpoint().map_err(ApiError::internal)?;
    {
        let mut query = login.query_pairs_mut();
        query.append_pair("return_to", return_to.as_str());
        if let Some(passthrough) = request.state.as_deref() {
            query.append_pair("state", passthrough);
        }
    }
    Ok(Redirect::to(login.as_str()).into_response())
}

fn consent_redirect(state: &AppState, request: &AuthorizeRequest) -> Result<Response, ApiError> {
    let mut consent = state.config.consent_endpoint().map_err(ApiError::internal)?;
    consent.query_pairs_mut().extend_pairs(request.query_pairs());
    Ok(Redirect::to(consent.as_str()).into_response())
}

/// Authorization endpoint (RFC 6749 section 4.1.1, PKCE required)
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH_TAG,
    params(
        AuthorizeRequest,
        ("x-authenticated-user" = Option<String>, Header, description = "User authenticated by the session layer"),
    ),
    responses(
        (status = 303, description = "Redirect to login, to consent, or to the client with a code or error"),
        (status = 400, description = "Client or redirect_uri cannot be trusted", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub(crate) async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(request): Query<AuthorizeRequest>,
) -> Response {
    let user = session_user(&state, &headers);
    let outcome = match state.server.authorize(&request, user.as_deref()) {
        Ok(outcome) => outcome,
        Err(err) => return authorize_error(err),
    };

    let response = match outcome {
        AuthorizeOutcome::LoginRequired(_) => login_redirect(&state, &request),
        AuthorizeOutcome::ConsentRequired { .. } => consent_redirect(&state, &request),
        AuthorizeOutcome::Issued(issued) => issued
            .redirect_url()
            .map(|url| Redirect::to(&url).into_response())
            .map_err(ApiError::from),
    };
    response.unwrap_or_else(IntoResponse::into_response)
}

/// Token endpoint (RFC 6749 section 3.2)
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    params(
        ("Authorization" = Option<String>, Header, description = "HTTP Basic client credentials"),
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenSet),
        (status = 400, description = "Invalid request or grant", body = ErrorBody),
        (status = 401, description = "Client authentication failed", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub(crate) async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => return form_rejection(rejection).into_response(),
    };
    let result = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .and_then(|credentials| state.server.token(&request, &credentials));

    match result {
        Ok(token_set) => no_store_json(token_set),
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Token revocation (RFC 7009). Reports success for any token once the
/// client is authenticated.
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH_TAG,
    request_body(content = TokenHintRequest, content_type = "application/x-www-form-urlencoded"),
    params(
        ("Authorization" = Option<String>, Header, description = "HTTP Basic client credentials"),
    ),
    responses(
        (status = 200, description = "Revoked, or nothing to revoke"),
        (status = 400, description = "No token given", body = ErrorBody),
        (status = 401, description = "Client authentication failed", body = ErrorBody)
    )
)]
pub(crate) async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenHintRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => return form_rejection(rejection).into_response(),
    };
    let result = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .and_then(|credentials| state.server.revoke(&request, &credentials));

    match result {
        Ok(()) => {
            let mut response = StatusCode::OK.into_response();
            presets::no_store().apply(&mut response);
            response
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Token introspection (RFC 7662)
#[utoipa::path(
    post,
    path = "/introspect",
    tag = OAUTH_TAG,
    request_body(content = TokenHintRequest, content_type = "application/x-www-form-urlencoded"),
    params(
        ("Authorization" = Option<String>, Header, description = "HTTP Basic client credentials"),
    ),
    responses(
        (status = 200, description = "Token state", body = Introspection),
        (status = 400, description = "No token given", body = ErrorBody),
        (status = 401, description = "Client authentication failed", body = ErrorBody)
    )
)]
pub(crate) async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenHintRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => return form_rejection(rejection).into_response(),
    };
    let result = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .and_then(|credentials| state.server.introspect(&request, &credentials));

    match result {
        Ok(introspection) => no_store_json(introspection),
        Err(err) => ApiError::from(err).into_response(),
    }
}
