use crate::headers::presets;
use axum::response::IntoResponse;
use axum::Json;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use log::error;
use oidc_engine::OAuthError;
use serde::Serialize;
use utoipa::ToSchema;

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_description: String,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: String,
    pub error_description: String,
    pub status_code: StatusCode,
    /// `WWW-Authenticate` challenge sent with 401 and 403 responses
    pub challenge: Option<String>,
}

impl ApiError {
    pub fn new<S: ToString, D: ToString>(error: S, description: D, status_code: StatusCode) -> Self {
        Self {
            error: error.to_string(),
            error_description: description.to_string(),
            status_code,
            challenge: None,
        }
    }

    pub fn invalid_request<S: ToString>(description: S) -> Self {
        Self::new("invalid_request", description, StatusCode::BAD_REQUEST)
    }

    /// Missing or unusable bearer token on a protected resource (RFC 6750)
    pub fn unauthorized<S: ToString>(description: S) -> Self {
        Self::new("invalid_token", description, StatusCode::UNAUTHORIZED)
            .with_challenge(r#"Bearer error="invalid_token""#)
    }

    pub fn internal<S: ToString>(detail: S) -> Self {
        error!("Internal error: {}", detail.to_string());
        Self::new(
            "server_error",
            "The authorization server encountered an internal error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    pub fn with_challenge<S: ToString>(mut self, challenge: S) -> Self {
        self.challenge = Some(challenge.to_string());
        self
    }

    /// Bearer-protected endpoints answer with a challenge instead of the
    /// token endpoint's client-authentication error.
    pub fn bearer(err: OAuthError) -> Self {
        let api_error = Self::from(err);
        match api_error.status_code {
            StatusCode::UNAUTHORIZED => Self {
                error: "invalid_token".to_string(),
                ..api_error
            }
            .with_challenge(r#"Bearer error="invalid_token""#),
            StatusCode::FORBIDDEN => {
                api_error.with_challenge(r#"Bearer error="insufficient_scope""#)
            }
            _ => api_error,
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        if matches!(err, OAuthError::Configuration(_) | OAuthError::Storage(_)) {
            error!("Request failed: {}", err);
        }
        let status_code =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let api_error = Self::new(err.error_code(), err.description(), status_code);
        if matches!(err, OAuthError::InvalidClient(_)) {
            // RFC 6749 section 5.2
            return api_error.with_challenge(r#"Basic realm="oauth""#);
        }
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            error: self.error,
            error_description: self.error_description,
        };
        let mut response = (self.status_code, Json(body)).into_response();
        if let Some(challenge) = self.challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
        }
        presets::no_store().apply(&mut response);
        response
    }
}
