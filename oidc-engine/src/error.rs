use crate::crypto::KeyError;
use crate::store::StorageError;
use thiserror::Error;

/// Protocol-level errors surfaced to OAuth clients.
///
/// Every variant maps to one of the standard error codes of RFC 6749 section
/// 5.2 / 4.1.2.1 (or RFC 6750 for bearer-token failures). The `String`
/// payloads are human readable descriptions that are safe to return to the
/// client; internal detail only ever lives in `Configuration` and `Storage`,
/// whose descriptions are replaced by a generic message.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid client: {0}")]
    InvalidClient(String),
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("authentication required")]
    LoginRequired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("insufficient permission: {0}")]
    Forbidden(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] KeyError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl OAuthError {
    /// The standard error code sent in the `error` field
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::LoginRequired => "login_required",
            Self::InvalidToken(_) => "invalid_token",
            Self::Forbidden(_) => "insufficient_scope",
            Self::Configuration(_) | Self::Storage(_) => "server_error",
        }
    }

    /// The description sent in `error_description`
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidScope(d)
            | Self::AccessDenied(d)
            | Self::InvalidToken(d)
            | Self::Forbidden(d) => d.clone(),
            Self::LoginRequired => "The user must authenticate first".to_string(),
            Self::Configuration(_) | Self::Storage(_) => {
                "The authorization server encountered an internal error".to_string()
            }
        }
    }

    /// HTTP status the error is reported with when it is not relayed by redirect
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidClient(_) | Self::InvalidToken(_) | Self::LoginRequired => 401,
            Self::Forbidden(_) => 403,
            Self::Configuration(_) | Self::Storage(_) => 500,
            _ => 400,
        }
    }

    /// Only a backing-store outage is worth retrying; everything else is
    /// deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::InvalidClient(description.into())
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_statuses() {
        let err = OAuthError::invalid_grant("code already used");
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.description(), "code already used");

        let err = OAuthError::invalid_client("unknown client");
        assert_eq!(err.status_code(), 401);

        let err = OAuthError::Forbidden("missing permissions:check".to_string());
        assert_eq!(err.error_code(), "insufficient_scope");
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = OAuthError::from(StorageError::Unavailable("pg connection reset".to_string()));
        assert_eq!(err.error_code(), "server_error");
        assert_eq!(err.status_code(), 500);
        assert!(err.is_retryable());
        assert!(!err.description().contains("pg connection"));

        let err = OAuthError::from(KeyError::NoSigningKey);
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), 500);
    }
}
