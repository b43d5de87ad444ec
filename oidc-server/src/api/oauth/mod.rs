//! OAuth 2.1 / OpenID Connect endpoints
//!
//! ## Supported flows
//! - Authorization Code with PKCE (S256 only), for every client
//! - Refresh Token with rotation and replay detection
//! - Token Revocation (RFC 7009) and Introspection (RFC 7662)
//!
//! User authentication is not handled here: a fronting session layer
//! passes the authenticated user id in the configured session header, and
//! unauthenticated authorize requests are redirected to the login URL.

pub mod client_auth;
pub mod consent;
pub mod handlers;
pub mod models;

use crate::state::AppState;
use axum::routing::{get, post, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(handlers::authorize))
        .route(
            "/consent",
            get(consent::consent_view).post(consent::consent_decision),
        )
        .route("/token", post(handlers::token))
        .route("/revoke", post(handlers::revoke))
        .route("/introspect", post(handlers::introspect))
}
