//! Consent screen backend. The screen itself is rendered by a front end
//! that reads the pending request here and posts the user's answer back.

use crate::api::oauth::handlers::{authorize_error, no_store_json, session_user};
use crate::api::oauth::models::ConsentForm;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::FormRejection, Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use log::info;
use oidc_engine::request::AuthorizeRequest;
use oidc_engine::server::ConsentView;

fn login_required() -> Response {
    ApiError::new(
        "login_required",
        "The user must authenticate first",
        StatusCode::UNAUTHORIZED,
    )
    .into_response()
}

/// Pending consent: client display name and the requested scopes
#[utoipa::path(
    get,
    path = "/consent",
    tag = OAUTH_TAG,
    params(
        AuthorizeRequest,
        ("x-authenticated-user" = String, Header, description = "User authenticated by the session layer"),
    ),
    responses(
        (status = 200, description = "Consent screen data", body = ConsentView),
        (status = 400, description = "Invalid authorize parameters", body = ErrorBody),
        (status = 401, description = "No authenticated user", body = ErrorBody)
    )
)]
pub(crate) async fn consent_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(request): Query<AuthorizeRequest>,
) -> Response {
    let Some(user) = session_user(&state, &headers) else {
        return login_required();
    };
    match state.server.consent_view(&request, &user) {
        Ok(view) => no_store_json(view),
        Err(err) => authorize_error(err),
    }
}

/// Record the user's decision and continue the authorization
#[utoipa::path(
    post,
    path = "/consent",
    tag = OAUTH_TAG,
    request_body(content = ConsentForm, content_type = "application/x-www-form-urlencoded"),
    params(
        ("x-authenticated-user" = String, Header, description = "User authenticated by the session layer"),
    ),
    responses(
        (status = 303, description = "Redirect to the client with a code, or with access_denied"),
        (status = 400, description = "Invalid authorize parameters", body = ErrorBody),
        (status = 401, description = "No authenticated user", body = ErrorBody)
    )
)]
pub(crate) async fn consent_decision(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<ConsentForm>, FormRejection>,
) -> Response {
    let Some(user) = session_user(&state, &headers) else {
        return login_required();
    };
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => {
            return ApiError::invalid_request(rejection.body_text()).into_response();
        }
    };

    match state.server.decide_consent(&form.authorize, &user, form.decision) {
        Ok(response) => {
            info!(
                "User '{}' approved client '{}'",
                user,
                form.authorize.client_id.as_deref().unwrap_or_default()
            );
            match response.redirect_url() {
                Ok(url) => Redirect::to(&url).into_response(),
                Err(err) => ApiError::from(err).into_response(),
            }
        }
        Err(err) => authorize_error(err),
    }
}
