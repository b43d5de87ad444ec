use confique::Config;

/// Configuration of the per-user permission cache
#[derive(Debug, Config, Clone)]
pub struct PermissionCacheConfig {
    /// Seconds a resolved permission set may be served (default: 300)
    #[config(env = "OIDC_CACHE_TTL", default = 300)]
    pub ttl: u64,

    /// Maximum number of cached users (default: 10000)
    #[config(env = "OIDC_CACHE_CAPACITY", default = 10000)]
    pub capacity: u64,
}

/// Periodic purge of expired codes, tokens and retired keys
#[derive(Debug, Config, Clone)]
pub struct SweeperConfig {
    #[config(env = "OIDC_SWEEPER_ENABLED", default = true)]
    pub enabled: bool,

    /// Seconds between sweeps (default: 60)
    #[config(env = "OIDC_SWEEPER_INTERVAL", default = 60)]
    pub interval: u64,
}
