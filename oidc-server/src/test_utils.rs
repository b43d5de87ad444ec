use crate::config::ServerConfig;
use crate::create_app;
use crate::seed;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use oidc_engine::clock::{Clock, ManualClock};
use oidc_engine::consent::ConsentDecision;
use oidc_engine::pkce;
use oidc_engine::request::AuthorizeRequest;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use url::{form_urlencoded, Url};

pub const WEB_CLIENT_ID: &str = "web-app";
pub const WEB_CLIENT_SECRET: &str = "web-app-secret";
pub const WEB_REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const SESSION_HEADER: &str = "x-authenticated-user";
/// Seeded user holding `permissions:check`
pub const GATEWAY_USER: &str = "api-gateway";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

const START_TIME: i64 = 1_700_000_000;

/// Test fixture for exercising the HTTP API against a seeded, in-memory
/// authorization server.
///
/// Time is driven by a [`ManualClock`], so tests move token and code expiry
/// forward with `fixture.clock.advance(..)` instead of sleeping.
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let tokens = fixture.tokens_for("alice").await;
///     let bearer = format!("Bearer {}", tokens["access_token"].as_str().unwrap());
///
///     let response = fixture
///         .get_with_headers("/userinfo", &[("Authorization", &bearer)])
///         .await;
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub config: ServerConfig,
}

impl TestFixture {
    /// Creates a fixture with the test configuration and the bundled seed data
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::for_test()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let clock = Arc::new(ManualClock::new(START_TIME));
        let state = AppState::for_testing(config.clone(), clock.clone() as Arc<dyn Clock>);
        seed::load_str(&state.server, include_str!("../seed/seed.json"))
            .expect("Failed to load seed data");
        let app = create_app(state.clone()).await;

        Self {
            app,
            state,
            clock,
            config,
        }
    }

    /// Configures the test logger. Called by the constructors; later calls
    /// are no-ops.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        self.get_with_headers(uri, &[]).await
    }

    /// GET as a user the session layer has already authenticated
    pub async fn get_as_user(&self, uri: impl AsRef<str>, user: &str) -> TestResponse {
        self.get_with_headers(uri, &[(SESSION_HEADER, user)]).await
    }

    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");
        self.send(request).await
    }

    /// POSTs `form` as `application/x-www-form-urlencoded`
    pub async fn post_form(
        &self,
        uri: impl AsRef<str>,
        form: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().map(|(name, value)| (*name, value.as_str())))
            .finish();
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post_json<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = serde_json::to_value(body).expect("Failed to serialize body to JSON");
        self.send_json(Method::POST, uri, Some(body), headers).await
    }

    /// Sends a request with an optional JSON body
    pub async fn send_json(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(method, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("Failed to serialize body to JSON"))
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }

    /// Issues an authorization code for `user` as if they had just approved
    /// the consent screen, recording their consent along the way.
    pub fn issue_code(&self, client_id: &str, user: &str) -> String {
        self.state
            .server
            .decide_consent(&authorize_request(client_id), user, ConsentDecision::Allow)
            .expect("Failed to issue authorization code")
            .code
    }

    /// Runs the code flow for `user` on the web client and returns the token
    /// response body.
    pub async fn tokens_for(&self, user: &str) -> Value {
        let code = self.issue_code(WEB_CLIENT_ID, user);
        let response = self
            .post_form(
                "/token",
                &code_exchange_form(&code),
                &[(AUTHORIZATION.as_str(), &web_basic_auth())],
            )
            .await;
        response.assert_ok();
        response.json
    }

    pub async fn refresh(&self, refresh_token: &str) -> TestResponse {
        self.post_form(
            "/token",
            &[
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ],
            &[(AUTHORIZATION.as_str(), &web_basic_auth())],
        )
        .await
    }
}

/// Response from a test request with its status, headers and JSON body.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body as JSON (empty object if absent or not JSON)
    pub json: Value,
}

impl TestResponse {
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response body")
    }

    /// The `Location` header of a redirect
    pub fn location(&self) -> String {
        self.headers
            .get(LOCATION)
            .expect("Response has no Location header")
            .to_str()
            .expect("Location header is not valid UTF-8")
            .to_string()
    }

    /// A decoded query parameter of the `Location` header
    pub fn location_param(&self, name: &str) -> Option<String> {
        let url = Url::parse(&self.location()).expect("Location is not an absolute URL");
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

pub fn challenge() -> String {
    pkce::challenge_for(VERIFIER)
}

/// A valid authorization request for `client_id` against the web client's
/// redirect URI
pub fn authorize_request(client_id: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        response_type: Some("code".to_string()),
        client_id: Some(client_id.to_string()),
        redirect_uri: Some(WEB_REDIRECT_URI.to_string()),
        scope: Some("openid profile".to_string()),
        state: Some("xyz".to_string()),
        code_challenge: Some(challenge()),
        code_challenge_method: Some(pkce::METHOD_S256.to_string()),
        nonce: Some("n-0S6_WzA2Mj".to_string()),
    }
}

pub fn authorize_uri(client_id: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(authorize_request(client_id).query_pairs())
        .finish();
    format!("/authorize?{query}")
}

pub fn code_exchange_form(code: &str) -> Vec<(&'static str, String)> {
    vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", WEB_REDIRECT_URI.to_string()),
        ("code_verifier", VERIFIER.to_string()),
    ]
}

pub fn basic_auth(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{secret}")))
}

pub fn web_basic_auth() -> String {
    basic_auth(WEB_CLIENT_ID, WEB_CLIENT_SECRET)
}
