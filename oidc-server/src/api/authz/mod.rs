pub mod permission_check;

use crate::state::AppState;
use axum::routing::post;
use axum::Router;

/// Combines all authorization-related routes into a single router
pub(super) fn router() -> Router<AppState> {
    Router::new().route(
        "/permissions/check",
        post(permission_check::permission_check_handler),
    )
}
