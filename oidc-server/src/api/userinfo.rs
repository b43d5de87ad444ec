use crate::api::bearer_token;
use crate::api::oauth::handlers::no_store_json;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use oidc_engine::tokens::UserInfo;

/// OIDC userinfo. Claims are released according to the token's scope.
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH_TAG,
    params(
        ("Authorization" = String, Header, description = "Bearer access token"),
    ),
    responses(
        (status = 200, description = "Claims about the token's subject", body = UserInfo),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorBody),
        (status = 403, description = "The token lacks the openid scope", body = ErrorBody)
    )
)]
pub(crate) async fn userinfo(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };
    match state.server.userinfo(token) {
        Ok(info) => no_store_json(info),
        Err(err) => ApiError::bearer(err).into_response(),
    }
}

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/userinfo", get(userinfo).post(userinfo))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use http::header::WWW_AUTHENTICATE;
    use http::StatusCode;

    #[tokio::test]
    async fn test_userinfo() {
        let fixture = TestFixture::new().await;
        let tokens = fixture.tokens_for("alice").await;
        let bearer = format!("Bearer {}", tokens["access_token"].as_str().unwrap());

        let response = fixture
            .get_with_headers("/userinfo", &[("Authorization", &bearer)])
            .await;
        response.assert_ok();
        assert_eq!(response.json["sub"], "alice");
        assert_eq!(response.json["name"], "Alice Liddell");
        // No email scope was granted
        assert!(response.json.get("email").is_none());
    }

    #[tokio::test]
    async fn test_userinfo_requires_valid_token() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/userinfo").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(response.headers.contains_key(WWW_AUTHENTICATE));

        let response = fixture
            .get_with_headers("/userinfo", &[("Authorization", "Bearer not.a.jwt")])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json["error"], "invalid_token");
    }

    #[tokio::test]
    async fn test_userinfo_rejects_revoked_token() {
        let fixture = TestFixture::new().await;
        let tokens = fixture.tokens_for("alice").await;
        let access_token = tokens["access_token"].as_str().unwrap();
        fixture
            .post_form(
                "/revoke",
                &[("token", access_token.to_string())],
                &[("Authorization", &web_basic_auth())],
            )
            .await
            .assert_ok();

        let bearer = format!("Bearer {access_token}");
        let response = fixture
            .get_with_headers("/userinfo", &[("Authorization", &bearer)])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
