use crate::api::bearer_token;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::AUTHZ_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use log::debug;
use oidc_engine::rbac::CheckReason;
use oidc_engine::server::PermissionCheck;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Does `userId` hold `action` on resources of `resourceAttributes.type`?
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionCheckRequest {
    pub user_id: String,
    pub resource_attributes: ResourceAttributes,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub(crate) struct ResourceAttributes {
    /// Resource type, the `resource` half of a `resource:action` permission
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Further attributes, accepted but not evaluated by role-based checks
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionCheckResponse {
    pub allowed: bool,
    pub reason_code: CheckReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/permissions/check",
    tag = AUTHZ_TAG,
    request_body = PermissionCheckRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer access token of a caller holding permissions:check"),
        ("x-request-id" = Option<String>, Header, description = "Echoed back as requestId"),
    ),
    responses(
        (status = 200, description = "Decision", body = PermissionCheckResponse),
        (status = 400, description = "Invalid request payload", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "The caller may not run permission checks", body = ErrorBody)
    )
)]
pub(crate) async fn permission_check_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PermissionCheckRequest>, JsonRejection>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };
    let caller = match state.server.authenticate(token) {
        Ok(caller) => caller,
        Err(err) => return ApiError::bearer(err).into_response(),
    };
    let Json(query) = match body {
        Ok(body) => body,
        Err(rejection) => return ApiError::invalid_request(rejection.body_text()).into_response(),
    };

    let check = PermissionCheck {
        user_id: query.user_id,
        resource: query.resource_attributes.resource_type,
        action: query.action,
    };
    match state.server.check_permission(&caller, &check) {
        Ok(decision) => {
            debug!(
                "Permission check by '{}': '{}' on '{}' -> {:?}",
                caller.sub,
                check.user_id,
                check.required_permission(),
                decision.reason
            );
            let request_id = headers
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            (
                StatusCode::OK,
                Json(PermissionCheckResponse {
                    allowed: decision.allowed,
                    reason_code: decision.reason,
                    request_id,
                }),
            )
                .into_response()
        }
        Err(err) => ApiError::bearer(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use http::header::WWW_AUTHENTICATE;
    use http::StatusCode;
    use serde_json::json;

    fn check(user: &str, resource: &str, action: &str) -> serde_json::Value {
        json!({
            "userId": user,
            "resourceAttributes": {"type": resource, "ownerId": "alice"},
            "action": action
        })
    }

    async fn gateway_bearer(fixture: &TestFixture) -> String {
        let tokens = fixture.tokens_for(GATEWAY_USER).await;
        format!("Bearer {}", tokens["access_token"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_permission_check_allowed() {
        let fixture = TestFixture::new().await;
        let bearer = gateway_bearer(&fixture).await;

        let response = fixture
            .post_json(
                "/permissions/check",
                &check("alice", "docs", "delete"),
                &[("Authorization", &bearer), ("x-request-id", "req-42")],
            )
            .await;
        response.assert_ok();
        assert_eq!(
            response.json,
            json!({"allowed": true, "reasonCode": "granted_by_role", "requestId": "req-42"})
        );
    }

    #[tokio::test]
    async fn test_permission_check_denied_reasons() {
        let fixture = TestFixture::new().await;
        let bearer = gateway_bearer(&fixture).await;

        let response = fixture
            .post_json(
                "/permissions/check",
                &check("bob", "docs", "delete"),
                &[("Authorization", &bearer)],
            )
            .await;
        response.assert_ok();
        assert_eq!(
            response.json,
            json!({"allowed": false, "reasonCode": "no_matching_permission"})
        );

        let response = fixture
            .post_json(
                "/permissions/check",
                &check("nobody", "docs", "read"),
                &[("Authorization", &bearer)],
            )
            .await;
        assert_eq!(response.json["reasonCode"], "user_not_found");
    }

    #[tokio::test]
    async fn test_permission_check_requires_caller_permission() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_json("/permissions/check", &check("alice", "docs", "read"), &[])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let tokens = fixture.tokens_for("alice").await;
        let bearer = format!("Bearer {}", tokens["access_token"].as_str().unwrap());
        let response = fixture
            .post_json(
                "/permissions/check",
                &check("alice", "docs", "read"),
                &[("Authorization", &bearer)],
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json["error"], "insufficient_scope");
        assert!(response.headers.contains_key(WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_permission_check_malformed_body() {
        let fixture = TestFixture::new().await;
        let bearer = gateway_bearer(&fixture).await;
        let response = fixture
            .post_json(
                "/permissions/check",
                &json!({"userId": "alice", "action": "read"}),
                &[("Authorization", &bearer)],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_request");
    }
}
