//! Administration of users, clients, roles, consents and signing keys

use crate::errors::{ApiError, ErrorBody};
use crate::openapi::ADMIN_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post, put},
    Router,
};
use chrono::Utc;
use log::info;
use oidc_engine::crypto::SigningKey;
use oidc_engine::OAuthError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct RolePermissions {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct UserStatus {
    pub active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct RotatedKey {
    pub kid: String,
    /// Unix time until which the previous key keeps verifying
    pub previous_key_retires_at: i64,
}

fn done(result: Result<(), OAuthError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn deleted(result: Result<bool, OAuthError>, what: &str) -> Response {
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => ApiError::new("not_found", format!("{what} not found"), StatusCode::NOT_FOUND)
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/admin/users/{user_id}/roles/{role}",
    tag = ADMIN_TAG,
    params(("user_id" = String, Path), ("role" = String, Path)),
    responses(
        (status = 204, description = "Role assigned"),
        (status = 400, description = "Unknown user or role", body = ErrorBody)
    )
)]
pub(crate) async fn assign_role(
    State(state): State<AppState>,
    Path((user_id, role)): Path<(String, String)>,
) -> Response {
    done(state.server.permissions().assign_role(&user_id, &role))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{user_id}/roles/{role}",
    tag = ADMIN_TAG,
    params(("user_id" = String, Path), ("role" = String, Path)),
    responses(
        (status = 204, description = "Role removed"),
        (status = 400, description = "Unknown user", body = ErrorBody)
    )
)]
pub(crate) async fn unassign_role(
    State(state): State<AppState>,
    Path((user_id, role)): Path<(String, String)>,
) -> Response {
    done(state.server.permissions().unassign_role(&user_id, &role))
}

#[utoipa::path(
    put,
    path = "/admin/users/{user_id}/active",
    tag = ADMIN_TAG,
    params(("user_id" = String, Path)),
    request_body = UserStatus,
    responses(
        (status = 204, description = "Status updated"),
        (status = 400, description = "Unknown user", body = ErrorBody)
    )
)]
pub(crate) async fn set_user_active(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<UserStatus>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(status)) => done(
            state
                .server
                .permissions()
                .set_user_active(&user_id, status.active),
        ),
        Err(rejection) => ApiError::invalid_request(rejection.body_text()).into_response(),
    }
}

/// Remove the user together with their role assignments
#[utoipa::path(
    delete,
    path = "/admin/users/{user_id}",
    tag = ADMIN_TAG,
    params(("user_id" = String, Path)),
    responses(
        (status = 204, description = "User removed"),
        (status = 404, description = "Unknown user", body = ErrorBody)
    )
)]
pub(crate) async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    deleted(state.server.delete_user(&user_id), "user")
}

#[utoipa::path(
    delete,
    path = "/admin/clients/{client_id}",
    tag = ADMIN_TAG,
    params(("client_id" = String, Path)),
    responses(
        (status = 204, description = "Client registration removed"),
        (status = 404, description = "Unknown client", body = ErrorBody)
    )
)]
pub(crate) async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Response {
    deleted(state.server.delete_client(&client_id), "client")
}

/// Create the role, or replace the permissions of an existing one
#[utoipa::path(
    put,
    path = "/admin/roles/{role}/permissions",
    tag = ADMIN_TAG,
    params(("role" = String, Path)),
    request_body = RolePermissions,
    responses(
        (status = 204, description = "Permissions replaced"),
        (status = 400, description = "Invalid request payload", body = ErrorBody)
    )
)]
pub(crate) async fn set_role_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
    body: Result<Json<RolePermissions>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(body)) => done(
            state
                .server
                .permissions()
                .set_role_permissions(&role, body.permissions),
        ),
        Err(rejection) => ApiError::invalid_request(rejection.body_text()).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/roles/{role}",
    tag = ADMIN_TAG,
    params(("role" = String, Path)),
    responses(
        (status = 204, description = "Role and its assignments removed"),
        (status = 404, description = "Unknown role", body = ErrorBody)
    )
)]
pub(crate) async fn delete_role(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Response {
    deleted(state.server.permissions().delete_role(&role), "role")
}

/// Withdraw a user's consent for a client, revoking its refresh tokens
#[utoipa::path(
    delete,
    path = "/admin/consents/{user_id}/{client_id}",
    tag = ADMIN_TAG,
    params(("user_id" = String, Path), ("client_id" = String, Path)),
    responses(
        (status = 204, description = "Consent revoked"),
        (status = 404, description = "No consent on record", body = ErrorBody)
    )
)]
pub(crate) async fn revoke_consent(
    State(state): State<AppState>,
    Path((user_id, client_id)): Path<(String, String)>,
) -> Response {
    deleted(state.server.consents().revoke(&user_id, &client_id), "consent")
}

/// Promote a freshly generated signing key. The previous key stays in the
/// JWKS until every token it signed has expired.
#[utoipa::path(
    post,
    path = "/admin/keys/rotate",
    tag = ADMIN_TAG,
    responses(
        (status = 200, description = "New signing key active", body = RotatedKey),
        (status = 500, description = "Key generation failed", body = ErrorBody)
    )
)]
pub(crate) async fn rotate_key(State(state): State<AppState>) -> Response {
    let kid = format!("key-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let generated = {
        let kid = kid.clone();
        tokio::task::spawn_blocking(move || SigningKey::generate(kid)).await
    };
    let key = match generated {
        Ok(Ok(key)) => key,
        Ok(Err(err)) => return ApiError::from(OAuthError::from(err)).into_response(),
        Err(err) => return ApiError::internal(err).into_response(),
    };

    let horizon = state.clock.now() + state.config.oauth.max_signed_token_ttl();
    let retires_at = state.keys.rotate(key, horizon);
    info!("Signing key rotated to '{}' through the admin API", kid);
    Json(RotatedKey {
        kid,
        previous_key_retires_at: retires_at,
    })
    .into_response()
}

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/users/{user_id}/roles/{role}",
            put(assign_role).delete(unassign_role),
        )
        .route("/admin/users/{user_id}", delete(delete_user))
        .route("/admin/users/{user_id}/active", put(set_user_active))
        .route("/admin/clients/{client_id}", delete(delete_client))
        .route("/admin/roles/{role}/permissions", put(set_role_permissions))
        .route("/admin/roles/{role}", delete(delete_role))
        .route("/admin/consents/{user_id}/{client_id}", delete(revoke_consent))
        .route("/admin/keys/rotate", post(rotate_key))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use http::{Method, StatusCode};
    use oidc_engine::clock::Clock;
    use serde_json::json;

    const ADMIN: (&str, &str) = ("Authorization", "Bearer test-admin-key");

    #[tokio::test]
    async fn test_admin_requires_api_key() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .send_json(Method::PUT, "/admin/users/bob/roles/editor", None, &[])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let response = fixture
            .send_json(
                Method::PUT,
                "/admin/users/bob/roles/editor",
                None,
                &[("Authorization", "Bearer wrong")],
            )
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_assignment_is_visible_immediately() {
        let fixture = TestFixture::new().await;
        let server = &fixture.state.server;
        assert!(!server.permissions().check("bob", "docs:delete").unwrap());

        fixture
            .send_json(Method::PUT, "/admin/users/bob/roles/editor", None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(server.permissions().check("bob", "docs:delete").unwrap());

        fixture
            .send_json(Method::DELETE, "/admin/users/bob/roles/editor", None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(!server.permissions().check("bob", "docs:delete").unwrap());
    }

    #[tokio::test]
    async fn test_role_permissions_and_deletion() {
        let fixture = TestFixture::new().await;
        let server = &fixture.state.server;

        fixture
            .send_json(
                Method::PUT,
                "/admin/roles/viewer/permissions",
                Some(json!({"permissions": ["docs:read", "reports:read"]})),
                &[ADMIN],
            )
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(server.permissions().check("bob", "reports:read").unwrap());

        fixture
            .send_json(Method::DELETE, "/admin/roles/viewer", None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(!server.permissions().check("bob", "docs:read").unwrap());

        let response = fixture
            .send_json(Method::DELETE, "/admin/roles/viewer", None, &[ADMIN])
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deactivate_user() {
        let fixture = TestFixture::new().await;
        fixture
            .send_json(
                Method::PUT,
                "/admin/users/alice/active",
                Some(json!({"active": false})),
                &[ADMIN],
            )
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(!fixture
            .state
            .server
            .permissions()
            .check("alice", "docs:read")
            .unwrap());
    }

    #[tokio::test]
    async fn test_revoke_consent() {
        let fixture = TestFixture::new().await;
        let tokens = fixture.tokens_for("alice").await;
        let uri = format!("/admin/consents/alice/{WEB_CLIENT_ID}");

        fixture
            .send_json(Method::DELETE, &uri, None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let response = fixture
            .refresh(tokens["refresh_token"].as_str().unwrap())
            .await;
        assert_eq!(response.json["error"], "invalid_grant");

        fixture
            .send_json(Method::DELETE, &uri, None, &[ADMIN])
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rotate_key_keeps_old_tokens_valid() {
        let fixture = TestFixture::new().await;
        let tokens = fixture.tokens_for("alice").await;

        let response = fixture
            .send_json(Method::POST, "/admin/keys/rotate", None, &[ADMIN])
            .await;
        response.assert_ok();
        let kid = response.json["kid"].as_str().unwrap().to_string();

        let jwks = fixture.get("/.well-known/jwks.json").await;
        let kids: Vec<&str> = jwks.json["keys"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|key| key["kid"].as_str())
            .collect();
        assert_eq!(kids.len(), 2);
        assert!(kids.contains(&kid.as_str()));

        let bearer = format!("Bearer {}", tokens["access_token"].as_str().unwrap());
        fixture
            .get_with_headers("/userinfo", &[("Authorization", &bearer)])
            .await
            .assert_ok();
    }

    #[tokio::test]
    async fn test_rotation_outlasts_client_token_lifetime() {
        let fixture = TestFixture::new().await;
        let server = &fixture.state.server;
        let mut client = server.find_client(WEB_CLIENT_ID).unwrap().unwrap();
        client.access_token_ttl = Some(7_200);
        server.register_client(client).unwrap();
        let tokens = fixture.tokens_for("alice").await;
        assert_eq!(tokens["expires_in"], 7_200);
        let access_token = tokens["access_token"].as_str().unwrap().to_string();

        let issued_at = fixture.clock.now();
        let response = fixture
            .send_json(Method::POST, "/admin/keys/rotate", None, &[ADMIN])
            .await;
        response.assert_ok();
        assert_eq!(response.json["previous_key_retires_at"], issued_at + 7_200);

        fixture.clock.advance(3_601);
        let bearer = format!("Bearer {access_token}");
        fixture
            .get_with_headers("/userinfo", &[("Authorization", &bearer)])
            .await
            .assert_ok();
        let introspection = fixture
            .post_form(
                "/introspect",
                &[("token", access_token)],
                &[("Authorization", &web_basic_auth())],
            )
            .await;
        assert_eq!(introspection.json["active"], true);
    }

    #[tokio::test]
    async fn test_delete_user_and_client() {
        let fixture = TestFixture::new().await;
        let server = &fixture.state.server;
        assert!(server.permissions().check("bob", "docs:read").unwrap());

        fixture
            .send_json(Method::DELETE, "/admin/users/bob", None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(!server.permissions().check("bob", "docs:read").unwrap());
        fixture
            .send_json(Method::DELETE, "/admin/users/bob", None, &[ADMIN])
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let tokens = fixture.tokens_for("alice").await;
        fixture
            .send_json(Method::DELETE, &format!("/admin/clients/{WEB_CLIENT_ID}"), None, &[ADMIN])
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let response = fixture
            .refresh(tokens["refresh_token"].as_str().unwrap())
            .await;
        assert_eq!(response.json["error"], "invalid_client");
    }

    #[tokio::test]
    async fn test_admin_disabled_without_key() {
        let mut config = crate::config::ServerConfig::for_test();
        config.admin_api_key = None;
        let fixture = TestFixture::with_config(config).await;
        let response = fixture
            .send_json(Method::PUT, "/admin/users/bob/roles/editor", None, &[ADMIN])
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}
