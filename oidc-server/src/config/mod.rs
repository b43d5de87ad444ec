pub mod cache;
pub mod keys;
pub mod oauth;

pub(crate) use crate::config::cache::{PermissionCacheConfig, SweeperConfig};
pub(crate) use crate::config::keys::KeysConfig;
pub(crate) use crate::config::oauth::OAuthConfig;
use confique::Config;
use url::Url;

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_FILE_ENV: &str = "OIDC_CONFIG_FILE";

/// Main configuration structure for the authorization server
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// The port the server listens on (default: 7780)
    #[config(env = "OIDC_PORT", default = 7780)]
    pub port: u16,

    /// Issuer identifier, also the base URL every endpoint is published under
    #[config(env = "OIDC_ISSUER", default = "http://localhost:7780")]
    pub issuer: String,

    /// Login collaborator. Relative URLs resolve against the issuer.
    #[config(env = "OIDC_LOGIN_URL", default = "/login")]
    pub login_url: String,

    /// Consent screen. Relative URLs resolve against the issuer.
    #[config(env = "OIDC_CONSENT_URL", default = "/consent")]
    pub consent_url: String,

    /// Header through which the fronting session layer passes the
    /// authenticated user id
    #[config(env = "OIDC_SESSION_HEADER", default = "x-authenticated-user")]
    pub session_header: String,

    /// Bearer key for the /admin API. The admin API is disabled when unset.
    #[config(env = "OIDC_ADMIN_API_KEY")]
    pub admin_api_key: Option<String>,

    /// JSON file with clients, users and roles loaded at startup
    #[config(env = "OIDC_SEED_FILE")]
    pub seed_file: Option<String>,

    #[config(nested)]
    pub oauth: OAuthConfig,

    #[config(nested)]
    pub keys: KeysConfig,

    #[config(nested)]
    pub cache: PermissionCacheConfig,

    #[config(nested)]
    pub sweeper: SweeperConfig,
}

impl ServerConfig {
    /// Load from the environment, then from the file named by
    /// `OIDC_CONFIG_FILE` if set. Environment variables win.
    pub fn new() -> Result<Self, String> {
        let mut builder = Self::builder().env();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.file(path);
        }
        let config = builder.load().map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        Url::parse(&self.issuer).map_err(|e| format!("invalid issuer '{}': {e}", self.issuer))?;
        self.login_endpoint()?;
        self.consent_endpoint()?;
        self.oauth.replay_policy()?;
        self.keys.previous_keys()?;
        if self.admin_api_key.as_deref().is_some_and(str::is_empty) {
            return Err("admin_api_key must not be empty".to_string());
        }
        Ok(())
    }

    /// Absolute URL of `path` under the issuer
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer.trim_end_matches('/'), path)
    }

    pub fn login_endpoint(&self) -> Result<Url, String> {
        self.resolve(&self.login_url)
    }

    pub fn consent_endpoint(&self) -> Result<Url, String> {
        self.resolve(&self.consent_url)
    }

    fn resolve(&self, url: &str) -> Result<Url, String> {
        let base = Url::parse(&format!("{}/", self.issuer.trim_end_matches('/')))
            .map_err(|e| format!("invalid issuer '{}': {e}", self.issuer))?;
        base.join(url).map_err(|e| format!("invalid url '{url}': {e}"))
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            port: 0,
            issuer: "https://auth.example".to_string(),
            login_url: "https://login.example/signin".to_string(),
            consent_url: "/consent".to_string(),
            session_header: "x-authenticated-user".to_string(),
            admin_api_key: Some("test-admin-key".to_string()),
            seed_file: None,
            oauth: OAuthConfig {
                code_ttl: 600,
                access_token_ttl: 3600,
                refresh_token_ttl: 2_592_000,
                id_token_ttl: 3600,
                max_param_length: 1024,
                replay_policy: "chain".to_string(),
            },
            keys: KeysConfig {
                signing_key_path: None,
                signing_key_id: "test-key-1".to_string(),
                previous_key_paths: None,
            },
            cache: PermissionCacheConfig {
                ttl: 300,
                capacity: 1000,
            },
            sweeper: SweeperConfig {
                enabled: false,
                interval: 60,
            },
        }
    }
}
