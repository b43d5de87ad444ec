use crate::errors::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use log::warn;
use subtle::ConstantTimeEq;

/// The token of an `Authorization: Bearer` header (RFC 6750 section 2.1)
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Requires the configured admin API key as bearer token
pub(super) async fn admin_authentication_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return ApiError::unauthorized("the admin API is disabled").into_response();
    };
    match bearer_token(request.headers()) {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        Some(_) => {
            warn!("Rejected admin request to {} with a wrong API key", request.uri().path());
            ApiError::unauthorized("invalid admin API key").into_response()
        }
        None => ApiError::unauthorized("missing bearer token").into_response(),
    }
}
