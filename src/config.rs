//! Centralized application configuration.
//!
//! Single source of truth for environment-driven settings, with sensible
//! defaults and validation at load time.

use std::time::Duration;

use crate::limiter::RateLimits;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: format!("must parse as {}", std::any::type_name::<T>()),
        }),
    }
}

/// Identity the registry advertises about itself.
#[derive(Debug, Clone)]
pub struct RegistryInfo {
    /// Self-advertised URL, used in the well-known card and index.
    pub base_url: String,
    /// Registry display name.
    pub name: String,
    /// Short description for the well-known card.
    pub description: String,
}

impl RegistryInfo {
    /// Load from `REGISTRY_BASE_URL` / `REGISTRY_NAME` / `REGISTRY_DESCRIPTION`.
    pub fn load() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("REGISTRY_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_BASE_URL".to_string(),
                value: base_url,
                reason: "must start with http:// or https://".to_string(),
            });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            name: std::env::var("REGISTRY_NAME").unwrap_or_else(|_| "canopy".into()),
            description: std::env::var("REGISTRY_DESCRIPTION")
                .unwrap_or_else(|_| "Agent registry and discovery service".into()),
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            name: "canopy".to_string(),
            description: "Agent registry and discovery service".to_string(),
        }
    }
}

/// Index writer and staleness settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Target cap for index lag behind committed writes.
    pub staleness_budget: Duration,
    /// How long publish blocks on a full index queue before `Overloaded`.
    pub enqueue_timeout: Duration,
}

impl IndexConfig {
    /// Load from `INDEX_STALENESS_BUDGET_MS` / `INDEX_ENQUEUE_TIMEOUT_MS`.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            staleness_budget: Duration::from_millis(env_parse(
                "INDEX_STALENESS_BUDGET_MS",
                2_000u64,
            )?),
            enqueue_timeout: Duration::from_millis(env_parse("INDEX_ENQUEUE_TIMEOUT_MS", 500u64)?),
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            staleness_budget: Duration::from_millis(2_000),
            enqueue_timeout: Duration::from_millis(500),
        }
    }
}

/// TTLs for the response cache.
#[derive(Debug, Clone)]
pub struct CacheTtlConfig {
    /// List endpoints.
    pub list: Duration,
    /// Card bodies.
    pub card: Duration,
    /// Well-known index and card.
    pub well_known: Duration,
    /// Search pages, when search caching is enabled.
    pub search: Duration,
    /// Whether search responses are cached at all. Off by default: search is
    /// high-cardinality.
    pub search_enabled: bool,
}

impl CacheTtlConfig {
    /// Load from the `CACHE_TTL_*` keys.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            list: Duration::from_secs(env_parse("CACHE_TTL_LIST_S", 30u64)?),
            card: Duration::from_secs(env_parse("CACHE_TTL_CARD_S", 120u64)?),
            well_known: Duration::from_secs(env_parse("CACHE_TTL_WELL_KNOWN_S", 60u64)?),
            search: Duration::from_secs(env_parse("CACHE_TTL_SEARCH_S", 10u64)?),
            search_enabled: env_parse("CACHE_SEARCH_ENABLED", false)?,
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            list: Duration::from_secs(30),
            card: Duration::from_secs(120),
            well_known: Duration::from_secs(60),
            search: Duration::from_secs(10),
            search_enabled: false,
        }
    }
}

/// Federation scheduling settings.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Master switch for the federation manager.
    pub enabled: bool,
    /// Global cap on concurrent peer syncs.
    pub max_parallel_syncs: usize,
    /// Interval used when a peer does not specify one.
    pub default_sync_interval: Duration,
}

impl FederationConfig {
    /// Load from `ENABLE_FEDERATION` / `PEER_SYNC_MAX_PARALLEL`.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: env_parse("ENABLE_FEDERATION", true)?,
            max_parallel_syncs: env_parse("PEER_SYNC_MAX_PARALLEL", 4usize)?,
            default_sync_interval: Duration::from_secs(env_parse(
                "PEER_SYNC_INTERVAL_S",
                3_600u64,
            )?),
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            enabled: true,
            max_parallel_syncs: 4,
            default_sync_interval: Duration::from_secs(3_600),
        }
    }
}

/// Quotas and request budgets.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Maximum agents one publisher may own; `None` is unlimited.
    pub max_agents_per_publisher: Option<usize>,
    /// Total wall-clock budget per request.
    pub request_budget: Duration,
}

impl LimitsConfig {
    /// Load from `MAX_AGENTS_PER_CLIENT` / `REQUEST_BUDGET_MS`.
    pub fn load() -> Result<Self, ConfigError> {
        let quota = env_parse("MAX_AGENTS_PER_CLIENT", 0usize)?;
        Ok(Self {
            max_agents_per_publisher: (quota > 0).then_some(quota),
            request_budget: Duration::from_millis(env_parse("REQUEST_BUDGET_MS", 10_000u64)?),
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            max_agents_per_publisher: None,
            request_budget: Duration::from_secs(10),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Registry identity.
    pub registry: RegistryInfo,
    /// Index writer settings.
    pub index: IndexConfig,
    /// Cache TTLs.
    pub cache_ttl: CacheTtlConfig,
    /// Rate limiter budgets.
    pub rate_limits: RateLimits,
    /// Federation scheduling.
    pub federation: FederationConfig,
    /// Quotas and deadlines.
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Load the complete configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            registry: RegistryInfo::load()?,
            index: IndexConfig::load()?,
            cache_ttl: CacheTtlConfig::load()?,
            rate_limits: RateLimits {
                public_read_per_min: env_parse("RATE_LIMIT_PUBLIC_READ", 100u32)?,
                auth_read_per_min: env_parse("RATE_LIMIT_AUTH_READ", 1_000u32)?,
                write_per_min: env_parse("RATE_LIMIT_WRITE", 60u32)?,
                sync_admin_per_min: env_parse("RATE_LIMIT_SYNC_ADMIN", 10u32)?,
            },
            federation: FederationConfig::load()?,
            limits: LimitsConfig::load()?,
        })
    }

    /// Defaults, useful for testing.
    pub fn defaults() -> Self {
        Self {
            registry: RegistryInfo::defaults(),
            index: IndexConfig::defaults(),
            cache_ttl: CacheTtlConfig::defaults(),
            rate_limits: RateLimits::default(),
            federation: FederationConfig::defaults(),
            limits: LimitsConfig::defaults(),
        }
    }
}

/// Configuration error types.
#[derive(Debug)]
pub enum ConfigError {
    /// A configuration value is invalid.
    InvalidValue {
        /// Environment key.
        key: String,
        /// The rejected raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "Invalid configuration for {}: '{}' ({})", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::defaults();
        assert_eq!(config.index.staleness_budget, Duration::from_secs(2));
        assert_eq!(config.index.enqueue_timeout, Duration::from_millis(500));
        assert_eq!(config.cache_ttl.list, Duration::from_secs(30));
        assert_eq!(config.cache_ttl.card, Duration::from_secs(120));
        assert_eq!(config.cache_ttl.well_known, Duration::from_secs(60));
        assert!(!config.cache_ttl.search_enabled);
        assert_eq!(config.rate_limits.write_per_min, 60);
        assert_eq!(config.federation.max_parallel_syncs, 4);
        assert_eq!(
            config.federation.default_sync_interval,
            Duration::from_secs(3600)
        );
        assert!(config.limits.max_agents_per_publisher.is_none());
    }
}
