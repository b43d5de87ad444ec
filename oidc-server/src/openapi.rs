use crate::state::AppState;
use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const DISCOVERY_TAG: &str = "Discovery API";
pub(crate) const OAUTH_TAG: &str = "OAuth API";
pub(crate) const AUTHZ_TAG: &str = "Authorization API";
pub(crate) const ADMIN_TAG: &str = "Admin API";

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::health::health_check,
        crate::api::health::ready_check,
        crate::api::discovery::openid_configuration,
        crate::api::discovery::jwks,
        crate::api::oauth::handlers::authorize,
        crate::api::oauth::handlers::token,
        crate::api::oauth::handlers::revoke,
        crate::api::oauth::handlers::introspect,
        crate::api::oauth::consent::consent_view,
        crate::api::oauth::consent::consent_decision,
        crate::api::userinfo::userinfo,
        crate::api::authz::permission_check::permission_check_handler,
        crate::api::admin::assign_role,
        crate::api::admin::unassign_role,
        crate::api::admin::set_user_active,
        crate::api::admin::delete_user,
        crate::api::admin::delete_client,
        crate::api::admin::set_role_permissions,
        crate::api::admin::delete_role,
        crate::api::admin::revoke_consent,
        crate::api::admin::rotate_key,
    ),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = DISCOVERY_TAG, description = "OpenID provider metadata and signing keys"),
        (name = OAUTH_TAG, description = "OAuth 2.1 and OpenID Connect endpoints"),
        (name = AUTHZ_TAG, description = "Role-based permission checks"),
        (name = ADMIN_TAG, description = "User, client, role, consent and key administration"),
    ),
    info(
        title = "OIDC Authorization Server",
        description = "OAuth 2.1 / OpenID Connect authorization server with role-based permissions",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

async fn openapi_json_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Serves the generated OpenAPI document
pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json_handler))
}
