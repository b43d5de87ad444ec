use crate::config::ServerConfig;
use crate::seed;
use log::{info, warn};
use oidc_engine::clock::{Clock, SystemClock};
use oidc_engine::crypto::{KeyError, KeyRing, KeyStore, SigningKey, VerificationKey};
use oidc_engine::{AuthorizationServer, AuthorizationServerBuilder, OAuthError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("key material: {0}")]
    Key(#[from] KeyError),
    #[error("invalid seed file: {0}")]
    Seed(String),
    #[error(transparent)]
    Engine(#[from] OAuthError),
}

pub(crate) fn read_file(path: &str) -> Result<String, StartupError> {
    std::fs::read_to_string(path).map_err(|source| StartupError::Io {
        path: path.to_string(),
        source,
    })
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub server: Arc<AuthorizationServer>,
    /// The same ring the server signs with, kept concrete for rotation
    pub keys: Arc<KeyRing>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Load keys, wire the engine and apply the seed file
    pub fn new(config: ServerConfig) -> Result<Self, StartupError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let keys = Arc::new(Self::load_key_ring(&config, clock.now())?);
        let state = Self::from_parts(config, keys, clock)?;

        if let Some(path) = state.config.seed_file.as_deref() {
            let summary = seed::load_file(&state.server, path)?;
            info!(
                "Seeded {} clients, {} users and {} roles from {}",
                summary.clients, summary.users, summary.roles, path
            );
        }
        Ok(state)
    }

    pub fn from_parts(
        config: ServerConfig,
        keys: Arc<KeyRing>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        let engine_config = config
            .oauth
            .engine_config(config.cache.ttl, config.cache.capacity)
            .map_err(StartupError::Config)?;
        let key_store: Arc<dyn KeyStore> = keys.clone();
        let server = AuthorizationServerBuilder::new(config.issuer.clone())
            .with_clock(clock.clone())
            .with_config(engine_config)
            .with_key_store(key_store)
            .build();

        Ok(Self {
            config: Arc::new(config),
            server: Arc::new(server),
            keys,
            clock,
        })
    }

    fn load_key_ring(config: &ServerConfig, now: i64) -> Result<KeyRing, StartupError> {
        let kid = config.keys.signing_key_id.as_str();
        let signing_key = match config.keys.signing_key_path.as_deref() {
            Some(path) => SigningKey::from_pem(kid, &read_file(path)?)?,
            None => {
                warn!(
                    "No signing key configured, generating '{}'. Tokens will not survive a restart.",
                    kid
                );
                SigningKey::generate(kid)?
            }
        };
        let ring = KeyRing::new(signing_key);

        let previous = config.keys.previous_keys().map_err(StartupError::Config)?;
        let retire_after = now + config.oauth.max_signed_token_ttl();
        for (kid, path) in previous {
            ring.add_verification_key(VerificationKey::from_pem(kid.as_str(), &read_file(&path)?)?, retire_after);
            info!("Loaded verification key '{}', valid until {}", kid, retire_after);
        }
        Ok(ring)
    }

    /// Ready once a signing key is available
    pub fn health_check(&self) -> bool {
        self.server.key_store().signing_key().is_ok()
    }

    #[cfg(test)]
    pub fn for_testing(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let key = SigningKey::from_pem(
            config.keys.signing_key_id.as_str(),
            include_str!("../../oidc-engine/testdata/signing_key.pem"),
        )
        .expect("Failed to load test signing key");
        Self::from_parts(config, Arc::new(KeyRing::new(key)), clock)
            .expect("Failed to create test state")
    }
}
