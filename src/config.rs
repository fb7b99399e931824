//! Configuration management for Guardrail.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::breaker::FailureKind;
use crate::error::{GuardrailError, Result};

/// Environment prefix for layered overrides, e.g. `GUARDRAIL__SERVER__BIND_ADDR`.
const ENV_PREFIX: &str = "GUARDRAIL";

/// Main configuration for the Guardrail service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Circuit breakers keyed by dependency name
    #[serde(default = "default_breakers")]
    pub breakers: BTreeMap<String, BreakerConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            breakers: default_breakers(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// A quota: `limit` admissions per rolling `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum admissions in the window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Shared store address; absent means local accounting only
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Upper bound on the shared-store connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Prefix for shared-store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum identities tracked by the local fallback store
    #[serde(default = "default_local_max_keys")]
    pub local_max_keys: usize,

    /// How often idle identities are swept from the local store
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Default quota for authenticated callers
    #[serde(default = "default_authenticated")]
    pub authenticated: RateLimitPolicy,

    /// Default quota for anonymous callers
    #[serde(default = "default_anonymous")]
    pub anonymous: RateLimitPolicy,

    /// Endpoint-specific quotas keyed by path prefix
    #[serde(default = "default_endpoints")]
    pub endpoints: BTreeMap<String, RateLimitPolicy>,

    /// Path prefixes that are never limited
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Multipliers applied to the authenticated default quota by tier
    #[serde(default = "default_tier_multipliers")]
    pub tier_multipliers: HashMap<String, f64>,

    /// Breaker guarding shared store calls; while open, checks go straight
    /// to the local store
    #[serde(default = "default_store_breaker")]
    pub store_breaker: BreakerConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connect_timeout_ms: default_connect_timeout(),
            key_prefix: default_key_prefix(),
            local_max_keys: default_local_max_keys(),
            sweep_interval_secs: default_sweep_interval(),
            authenticated: default_authenticated(),
            anonymous: default_anonymous(),
            endpoints: default_endpoints(),
            exempt_paths: default_exempt_paths(),
            tier_multipliers: default_tier_multipliers(),
            store_breaker: default_store_breaker(),
        }
    }
}

impl RateLimitingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_key_prefix() -> String {
    "rate_limit:".to_string()
}

fn default_local_max_keys() -> usize {
    10000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_authenticated() -> RateLimitPolicy {
    RateLimitPolicy::new(1000, 3600)
}

fn default_anonymous() -> RateLimitPolicy {
    RateLimitPolicy::new(100, 3600)
}

fn default_endpoints() -> BTreeMap<String, RateLimitPolicy> {
    [
        ("/api/integrations/predict", RateLimitPolicy::new(20, 60)),
        ("/api/backtesting/run", RateLimitPolicy::new(10, 60)),
        ("/api/analytics/advanced", RateLimitPolicy::new(50, 60)),
        ("/api/wallets", RateLimitPolicy::new(100, 3600)),
        ("/api/wallets/refresh-balances", RateLimitPolicy::new(20, 3600)),
        ("/api/wallets/withdraw", RateLimitPolicy::new(10, 3600)),
        ("/api/dex/quote", RateLimitPolicy::new(60, 60)),
        ("/api/dex/swap", RateLimitPolicy::new(20, 3600)),
        ("/api/dex/trades", RateLimitPolicy::new(100, 60)),
    ]
    .into_iter()
    .map(|(path, policy)| (path.to_string(), policy))
    .collect()
}

fn default_exempt_paths() -> Vec<String> {
    ["/health", "/docs", "/redoc", "/openapi.json", "/favicon.ico"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tier_multipliers() -> HashMap<String, f64> {
    [
        ("free", 1.0),
        ("basic", 1.5),
        ("pro", 2.0),
        ("enterprise", 3.0),
        ("mega", 5.0),
    ]
    .into_iter()
    .map(|(tier, m)| (tier.to_string(), m))
    .collect()
}

fn default_store_breaker() -> BreakerConfig {
    BreakerConfig::new(3, 10, 1)
}

/// Configuration for one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive tripping failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Base backoff before a recovery trial call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Trial calls admitted (and successes required) while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Failure kinds that count against the breaker
    #[serde(default = "FailureKind::default_trip_set")]
    pub trip_on: Vec<FailureKind>,
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, timeout_secs: u64, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            timeout_secs,
            half_open_max_calls,
            trip_on: FailureKind::default_trip_set(),
        }
    }

    /// Replace the set of failure kinds that count.
    pub fn trip_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.trip_on = kinds.into_iter().collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(
            default_failure_threshold(),
            default_timeout_secs(),
            default_half_open_max_calls(),
        )
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    3
}

/// The breakers every deployment starts with.
pub fn default_breakers() -> BTreeMap<String, BreakerConfig> {
    [
        ("exchange_api", BreakerConfig::new(5, 60, 3)),
        ("database", BreakerConfig::new(3, 30, 2)),
        ("ml_service", BreakerConfig::new(5, 120, 3)),
    ]
    .into_iter()
    .map(|(name, cfg)| (name.to_string(), cfg))
    .collect()
}

impl ServiceConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Build the layered configuration.
    ///
    /// Sources, lowest precedence first: built-in defaults, the optional YAML
    /// file, `GUARDRAIL__*` environment variables, and `REDIS_URL`. The file is
    /// parsed as-is so map keys (breaker names, endpoint paths) keep their case;
    /// environment keys match existing keys case-insensitively.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        let overrides: serde_json::Value = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        let mut merged = serde_json::to_value(&base)?;
        merge_overrides(&mut merged, overrides);
        let mut config: ServiceConfig = serde_json::from_value(merged)?;

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.rate_limiting.redis_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let quotas = [
            ("authenticated", &self.rate_limiting.authenticated),
            ("anonymous", &self.rate_limiting.anonymous),
        ]
        .into_iter()
        .chain(
            self.rate_limiting
                .endpoints
                .iter()
                .map(|(path, policy)| (path.as_str(), policy)),
        );

        for (name, policy) in quotas {
            if policy.window_secs == 0 {
                return Err(GuardrailError::Config(format!(
                    "rate limit policy '{}' has a zero-length window",
                    name
                )));
            }
        }

        for (name, breaker) in &self.breakers {
            check_breaker(name, breaker)?;
        }
        check_breaker("rate_limiting.store_breaker", &self.rate_limiting.store_breaker)
    }
}

fn check_breaker(name: &str, breaker: &BreakerConfig) -> Result<()> {
    if breaker.failure_threshold == 0 {
        return Err(GuardrailError::Config(format!(
            "breaker '{}' needs a failure_threshold of at least 1",
            name
        )));
    }
    if breaker.half_open_max_calls == 0 {
        return Err(GuardrailError::Config(format!(
            "breaker '{}' needs half_open_max_calls of at least 1",
            name
        )));
    }
    Ok(())
}

/// Overlay `overrides` onto `base`. Object keys already in `base` are matched
/// ignoring ASCII case; anything else is inserted as given.
fn merge_overrides(base: &mut serde_json::Value, overrides: serde_json::Value) {
    use serde_json::Value;

    match (base, overrides) {
        (Value::Object(target), Value::Object(overrides)) => {
            for (key, value) in overrides {
                let existing = target.keys().find(|k| k.eq_ignore_ascii_case(&key)).cloned();
                match existing {
                    Some(existing) => {
                        if let Some(slot) = target.get_mut(&existing) {
                            merge_overrides(slot, value);
                        }
                    }
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
