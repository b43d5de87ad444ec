//! Protocol lifetimes and limits

use confique::Config;
use oidc_engine::tokens::{ReplayPolicy, TokenConfig};
use oidc_engine::EngineConfig;

/// OAuth 2.1 / OIDC protocol configuration
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Authorization code lifetime in seconds (default: 600)
    #[config(env = "OIDC_OAUTH_CODE_TTL", default = 600)]
    pub code_ttl: i64,

    /// Access token lifetime in seconds (default: 3600)
    #[config(env = "OIDC_OAUTH_ACCESS_TOKEN_TTL", default = 3600)]
    pub access_token_ttl: i64,

    /// Refresh token lifetime in seconds (default: 2592000 = 30 days)
    #[config(env = "OIDC_OAUTH_REFRESH_TOKEN_TTL", default = 2592000)]
    pub refresh_token_ttl: i64,

    /// ID token lifetime in seconds (default: 3600)
    #[config(env = "OIDC_OAUTH_ID_TOKEN_TTL", default = 3600)]
    pub id_token_ttl: i64,

    /// Maximum length of the state and nonce parameters (default: 1024)
    #[config(env = "OIDC_OAUTH_MAX_PARAM_LENGTH", default = 1024)]
    pub max_param_length: usize,

    /// What a replayed refresh token revokes: "chain" or "descendant" (default: chain)
    #[config(env = "OIDC_OAUTH_REPLAY_POLICY", default = "chain")]
    pub replay_policy: String,
}

impl OAuthConfig {
    pub fn replay_policy(&self) -> Result<ReplayPolicy, String> {
        self.replay_policy.parse()
    }

    /// Longest server-wide token lifetime, the minimum time a retired key
    /// keeps verifying. Tokens signed with a longer per-client lifetime
    /// extend it through the key ring.
    pub fn max_signed_token_ttl(&self) -> i64 {
        self.access_token_ttl.max(self.id_token_ttl)
    }

    pub fn engine_config(&self, cache_ttl: u64, cache_capacity: u64) -> Result<EngineConfig, String> {
        Ok(EngineConfig {
            code_ttl: self.code_ttl,
            max_param_length: self.max_param_length,
            permission_cache_ttl: cache_ttl,
            permission_cache_capacity: cache_capacity,
            tokens: TokenConfig {
                access_token_ttl: self.access_token_ttl,
                refresh_token_ttl: self.refresh_token_ttl,
                id_token_ttl: self.id_token_ttl,
                replay_policy: self.replay_policy()?,
            },
        })
    }
}
