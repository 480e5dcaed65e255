//! Configuration for the pool manager and the tenant context resolver.
//!
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! [pool]
//! max_connections = 50
//! idle_timeout_ms = 300000
//! enable_cleanup = true
//! cleanup_interval_ms = 60000
//! eviction_policy = "insertion_order"
//!
//! [tenant_resolution]
//! strategy = "header"
//! header_name = "x-tenant-id"
//! default_tenant = "${DEFAULT_TENANT:-public}"
//! ```
//!
//! `${VAR}` and `${VAR:-fallback}` placeholders are expanded from the
//! environment before parsing. Everything is read-only once handed to the
//! pool manager or resolver.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Tenant resolution settings.
    #[serde(default)]
    pub tenant_resolution: ResolverConfig,
}

impl TenancyConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenancyError::config(format!("failed to read {}: {}", path.display(), e)).with_source(e)
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> TenancyResult<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)
            .map_err(|e| TenancyError::config(e.to_string()).with_source(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> TenancyResult<()> {
        self.pool.validate()?;
        self.tenant_resolution.validate()
    }
}

/// Which entries are evicted when the pool is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest entries by insertion time.
    #[default]
    InsertionOrder,
    /// Entries with the oldest last access.
    LeastRecentlyUsed,
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of pooled tenant connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Entries unused for this long are evicted by the cleanup task.
    #[serde(
        rename = "idle_timeout_ms",
        with = "duration_ms",
        default = "default_idle_timeout"
    )]
    pub idle_timeout: Duration,

    /// Whether the background cleanup task runs.
    #[serde(default = "default_true")]
    pub enable_cleanup: bool,

    /// How often the cleanup task runs.
    #[serde(
        rename = "cleanup_interval_ms",
        with = "duration_ms",
        default = "default_cleanup_interval"
    )]
    pub cleanup_interval: Duration,

    /// Eviction order when the pool is full.
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            enable_cleanup: true,
            cleanup_interval: default_cleanup_interval(),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Fraction of `max_connections` evicted when the pool is full.
    pub const EVICTION_FRACTION: f64 = 0.1;

    /// Occupancy ratio above which background cleanup evicts.
    pub const CLEANUP_THRESHOLD: f64 = 0.8;

    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of pooled connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable the background cleanup task.
    pub fn enable_cleanup(mut self, enabled: bool) -> Self {
        self.enable_cleanup = enabled;
        self
    }

    /// Set the cleanup interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Entries evicted per eviction round: `floor(max * 0.1)`, at least one.
    pub fn eviction_count(&self) -> usize {
        let count = (self.max_connections as f64 * Self::EVICTION_FRACTION).floor() as usize;
        count.max(1)
    }

    /// Occupancy above which background cleanup evicts.
    pub fn cleanup_threshold(&self) -> f64 {
        self.max_connections as f64 * Self::CLEANUP_THRESHOLD
    }

    /// Check for unusable values.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.max_connections == 0 {
            return Err(TenancyError::config("pool.max_connections must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(TenancyError::config("pool.idle_timeout_ms must be greater than 0"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(TenancyError::config(
                "pool.cleanup_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// How the tenant is identified from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// A request header.
    #[default]
    Header,
    /// A label of the request host.
    Subdomain,
    /// A claim in the bearer token payload.
    TokenClaim,
    /// A host-supplied function.
    Custom,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Subdomain => "subdomain",
            Self::TokenClaim => "token-claim",
            Self::Custom => "custom",
        })
    }
}

/// Tenant context resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Active strategy.
    #[serde(default)]
    pub strategy: ResolutionStrategy,

    /// Header read by the header strategy.
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Claim read by the token-claim strategy.
    #[serde(default = "default_claim_name")]
    pub claim_name: String,

    /// Label index used by the subdomain strategy, counted from the left.
    #[serde(default)]
    pub subdomain_position: usize,

    /// Tenant used when the strategy yields nothing.
    #[serde(default)]
    pub default_tenant: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            header_name: default_header_name(),
            claim_name: default_claim_name(),
            subdomain_position: 0,
            default_tenant: None,
        }
    }
}

impl ResolverConfig {
    /// Create a configuration for the given strategy.
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Set the header name.
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set the claim name.
    pub fn claim_name(mut self, name: impl Into<String>) -> Self {
        self.claim_name = name.into();
        self
    }

    /// Set the subdomain position.
    pub fn subdomain_position(mut self, position: usize) -> Self {
        self.subdomain_position = position;
        self
    }

    /// Set the fallback tenant.
    pub fn default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.default_tenant = Some(tenant.into());
        self
    }

    /// Check for unusable values.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.header_name.trim().is_empty() {
            return Err(TenancyError::config(
                "tenant_resolution.header_name must not be empty",
            ));
        }
        if self.claim_name.trim().is_empty() {
            return Err(TenancyError::config(
                "tenant_resolution.claim_name must not be empty",
            ));
        }
        Ok(())
    }
}

fn default_max_connections() -> usize {
    50
}

fn default_idle_timeout() -> Duration {
    Duration::from_millis(300_000)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_millis(60_000)
}

fn default_true() -> bool {
    true
}

fn default_header_name() -> String {
    "x-tenant-id".to_string()
}

fn default_claim_name() -> String {
    "tenantId".to_string()
}

/// Serde helpers for durations stored as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

/// Expand `${VAR}` and `${VAR:-fallback}` from the environment.
///
/// Unset variables without a fallback are left as written.
fn expand_env_vars(content: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(content, |caps: &Captures<'_>| {
            match (std::env::var(&caps[1]), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(fallback)) => fallback.as_str().to_string(),
                (Err(_), None) => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TenancyConfig::default();
        assert_eq!(config.pool.max_connections, 50);
        assert_eq!(config.pool.idle_timeout, Duration::from_millis(300_000));
        assert!(config.pool.enable_cleanup);
        assert_eq!(config.pool.cleanup_interval, Duration::from_millis(60_000));
        assert_eq!(config.pool.eviction_policy, EvictionPolicy::InsertionOrder);
        assert_eq!(config.tenant_resolution.strategy, ResolutionStrategy::Header);
        assert_eq!(config.tenant_resolution.header_name, "x-tenant-id");
        assert_eq!(config.tenant_resolution.claim_name, "tenantId");
        assert!(config.tenant_resolution.default_tenant.is_none());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = TenancyConfig::from_toml_str("").unwrap();
        assert_eq!(config, TenancyConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [pool]
            max_connections = 10
            idle_timeout_ms = 1000
            enable_cleanup = false
            cleanup_interval_ms = 500
            eviction_policy = "least_recently_used"

            [tenant_resolution]
            strategy = "token-claim"
            claim_name = "tid"
            default_tenant = "public"
        "#;

        let config = TenancyConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(1));
        assert!(!config.pool.enable_cleanup);
        assert_eq!(config.pool.cleanup_interval, Duration::from_millis(500));
        assert_eq!(config.pool.eviction_policy, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.tenant_resolution.strategy, ResolutionStrategy::TokenClaim);
        assert_eq!(config.tenant_resolution.claim_name, "tid");
        assert_eq!(config.tenant_resolution.default_tenant.as_deref(), Some("public"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = r#"
            [pool]
            max_conections = 10
        "#;
        assert!(TenancyConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
        assert!(PoolConfig::new().idle_timeout(Duration::ZERO).validate().is_err());
        assert!(ResolverConfig::default().header_name(" ").validate().is_err());
        assert!(ResolverConfig::default().claim_name("").validate().is_err());
        assert!(TenancyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_eviction_count() {
        assert_eq!(PoolConfig::new().eviction_count(), 5);
        assert_eq!(PoolConfig::new().max_connections(25).eviction_count(), 2);
        assert_eq!(PoolConfig::new().max_connections(5).eviction_count(), 1);
        assert_eq!(PoolConfig::new().max_connections(1).eviction_count(), 1);
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("TENANTRY_TEST_DEFAULT_TENANT", "acme");
        }
        let expanded = expand_env_vars("a = \"${TENANTRY_TEST_DEFAULT_TENANT}\"");
        assert_eq!(expanded, "a = \"acme\"");
        unsafe {
            std::env::remove_var("TENANTRY_TEST_DEFAULT_TENANT");
        }
    }

    #[test]
    fn test_env_var_fallback() {
        let expanded = expand_env_vars("a = \"${TENANTRY_TEST_UNSET_VAR:-public}\"");
        assert_eq!(expanded, "a = \"public\"");

        let untouched = expand_env_vars("a = \"${TENANTRY_TEST_UNSET_VAR}\"");
        assert_eq!(untouched, "a = \"${TENANTRY_TEST_UNSET_VAR}\"");
    }
}
