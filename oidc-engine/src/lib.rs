//! # oidc-engine
//!
//! The protocol and security core of an OAuth 2.1 / OpenID Connect
//! authorization server.
//!
//! ## Components
//!
//! - **Request validation:** authorize and token requests checked against the
//!   client registration, with PKCE (S256) mandatory for every client.
//! - **Authorization codes:** short-lived, single-use, bound to the PKCE
//!   challenge.
//! - **Tokens:** RS256 access and ID tokens, opaque rotating refresh tokens,
//!   revocation and introspection.
//! - **Consent:** the scopes each user approved for each client.
//! - **RBAC:** role-based permission resolution with a TTL cache that is
//!   invalidated as soon as roles change.
//! - **Crypto:** signing keys with rotation and a published JWKS.
//!
//! Persistence and key material sit behind the traits in [`store`] and
//! [`crypto::KeyStore`]; in-memory implementations of both are included.
//! Everything is synchronous; callers own scheduling and I/O.
//!
//! ```no_run
//! use std::sync::Arc;
//! use oidc_engine::builder::AuthorizationServerBuilder;
//! use oidc_engine::crypto::{KeyRing, SigningKey};
//!
//! let key = SigningKey::generate("key-1").unwrap();
//! let server = AuthorizationServerBuilder::new("https://auth.example")
//!     .with_key_store(Arc::new(KeyRing::new(key)))
//!     .build();
//! println!("{}", server.issuer());
//! ```

pub mod builder;
pub mod clock;
pub mod codes;
pub mod consent;
pub mod crypto;
pub mod error;
pub mod model;
pub mod pkce;
pub mod rbac;
pub mod request;
pub mod scope;
pub mod server;
pub mod store;
pub mod tokens;
pub mod validator;

pub use builder::{AuthorizationServerBuilder, EngineConfig};
pub use error::OAuthError;
pub use server::{AuthorizationServer, AuthorizeOutcome};
