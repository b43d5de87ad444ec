use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::codes::{AuthorizationCodeStore, DEFAULT_CODE_TTL};
use crate::consent::ConsentManager;
use crate::crypto::{KeyStore, TokenSigner};
use crate::rbac::{PermissionCache, PermissionEvaluator};
use crate::server::AuthorizationServer;
use crate::store::{
    ClientRepository, CodeRepository, ConsentRepository, IdentityRepository, MemoryStore, Store,
    TokenRepository,
};
use crate::tokens::{TokenConfig, TokenService};
use crate::validator::RequestValidator;

/// Typestate markers for whether a key store has been provided.
pub struct Missing;
pub struct Present(Arc<dyn KeyStore>);

/// Tunables of the engine. Token lifetimes live in [`TokenConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub code_ttl: i64,
    /// Upper bound on the length of the `state` and `nonce` passthroughs
    pub max_param_length: usize,
    pub permission_cache_ttl: u64,
    pub permission_cache_capacity: u64,
    pub tokens: TokenConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_ttl: DEFAULT_CODE_TTL,
            max_param_length: 1024,
            permission_cache_ttl: 300,
            permission_cache_capacity: 10_000,
            tokens: TokenConfig::default(),
        }
    }
}

/// One backend seen through each repository interface
#[derive(Clone)]
struct Repositories {
    clients: Arc<dyn ClientRepository>,
    identities: Arc<dyn IdentityRepository>,
    codes: Arc<dyn CodeRepository>,
    tokens: Arc<dyn TokenRepository>,
    consents: Arc<dyn ConsentRepository>,
}

impl Repositories {
    fn from_store<S: Store + 'static>(store: Arc<S>) -> Self {
        Self {
            clients: store.clone(),
            identities: store.clone(),
            codes: store.clone(),
            tokens: store.clone(),
            consents: store,
        }
    }
}

/// A builder for wiring an [`AuthorizationServer`].
/// The builder is generic over one type parameter:
/// - KeysSet: whether the signing key store has been supplied.
pub struct AuthorizationServerBuilder<KeysSet> {
    issuer: String,
    repositories: Repositories,
    keys: KeysSet,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AuthorizationServerBuilder<Missing> {
    /// Creates a builder backed by an empty in-memory store and the system clock.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            repositories: Repositories::from_store(Arc::new(MemoryStore::new())),
            keys: Missing,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Sets the key store that signs and verifies tokens.
    pub fn with_key_store(self, keys: Arc<dyn KeyStore>) -> AuthorizationServerBuilder<Present> {
        AuthorizationServerBuilder {
            issuer: self.issuer,
            repositories: self.repositories,
            keys: Present(keys),
            clock: self.clock,
            config: self.config,
        }
    }
}

impl<KeysSet> AuthorizationServerBuilder<KeysSet> {
    /// Replaces the backing store.
    pub fn with_store<S: Store + 'static>(mut self, store: Arc<S>) -> Self {
        self.repositories = Repositories::from_store(store);
        self
    }

    /// Overrides the clock, mostly useful in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

impl AuthorizationServerBuilder<Present> {
    pub fn build(self) -> AuthorizationServer {
        let Self {
            issuer,
            repositories: repos,
            keys: Present(keys),
            clock,
            config,
        } = self;

        let permissions = Arc::new(PermissionEvaluator::new(
            repos.identities.clone(),
            PermissionCache::new(
                config.permission_cache_ttl,
                config.permission_cache_capacity,
                clock.clone(),
            ),
        ));
        let signer = TokenSigner::new(keys, issuer, clock.clone());
        let tokens = TokenService::new(
            signer,
            repos.tokens.clone(),
            repos.identities.clone(),
            permissions.clone(),
            clock.clone(),
            config.tokens.clone(),
        );

        AuthorizationServer {
            validator: RequestValidator::new(repos.clients.clone(), config.max_param_length),
            consents: ConsentManager::new(repos.consents, repos.tokens, clock.clone()),
            codes: AuthorizationCodeStore::new(repos.codes, clock.clone(), config.code_ttl),
            tokens,
            permissions,
            clients: repos.clients,
            identities: repos.identities,
            clock,
        }
    }
}
