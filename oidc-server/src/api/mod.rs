pub(crate) mod admin;
mod authn_middleware;
pub(crate) mod authz;
pub(crate) mod discovery;
pub(crate) mod health;
pub(crate) mod oauth;
pub(crate) mod userinfo;

use crate::api::authn_middleware::admin_authentication_middleware;
use crate::state::AppState;
use axum::{middleware, Router};

pub(crate) use authn_middleware::bearer_token;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    let root = Router::new()
        .merge(health::router())
        .merge(discovery::router())
        .merge(oauth::router())
        .merge(userinfo::router())
        .merge(authz::router());

    if state.config.admin_api_key.is_some() {
        root.merge(admin_routes(state))
    } else {
        root
    }
}

/// Administration routes, behind the static admin API key
fn admin_routes(state: &AppState) -> Router<AppState> {
    admin::router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        admin_authentication_middleware,
    ))
}
