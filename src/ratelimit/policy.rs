//! Rate limit policy resolution.
//!
//! Maps a request path and caller identity to the quota it is checked against.
//! First match wins: exempt paths, then admin bypass, then the longest matching
//! endpoint prefix, then the authenticated or anonymous default.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{RateLimitPolicy, RateLimitingConfig};

/// Tier assumed for anonymous callers and users without one.
pub const DEFAULT_TIER: &str = "free";

/// Authenticated caller, placed in request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: None,
            is_admin: false,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Normalized tier name.
    pub fn tier(&self) -> String {
        self.tier
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| DEFAULT_TIER.to_string())
    }
}

/// Quota a request is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    /// Rate limit key, e.g. `user:42` or `ip:10.0.0.1:/api/dex/swap`
    pub key: String,
    pub limit: u64,
    pub window: Duration,
    pub tier: String,
    /// Matched endpoint prefix, if an endpoint policy applied
    pub endpoint: Option<String>,
}

/// What to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not limited at all
    Exempt,
    /// Admin caller; passes with informational headers
    Bypass,
    Limited(Quota),
}

/// Resolved policy table.
#[derive(Debug, Clone)]
pub struct PolicySet {
    exempt_paths: Vec<String>,
    /// Endpoint prefixes, longest first
    endpoints: Vec<(String, RateLimitPolicy)>,
    authenticated: RateLimitPolicy,
    anonymous: RateLimitPolicy,
    tier_multipliers: HashMap<String, f64>,
}

impl PolicySet {
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        let mut endpoints: Vec<_> = config
            .endpoints
            .iter()
            .map(|(path, policy)| (path.clone(), *policy))
            .collect();
        endpoints.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self {
            exempt_paths: config.exempt_paths.clone(),
            endpoints,
            authenticated: config.authenticated,
            anonymous: config.anonymous,
            tier_multipliers: config
                .tier_multipliers
                .iter()
                .map(|(tier, m)| (tier.to_lowercase(), *m))
                .collect(),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Longest endpoint prefix matching `path`.
    pub fn endpoint_for(&self, path: &str) -> Option<(&str, RateLimitPolicy)> {
        self.endpoints
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, policy)| (prefix.as_str(), *policy))
    }

    /// Multiplier for `tier`; unknown tiers get 1.0.
    pub fn multiplier(&self, tier: &str) -> f64 {
        self.tier_multipliers.get(tier).copied().unwrap_or(1.0)
    }

    pub fn resolve(&self, path: &str, user: Option<&AuthenticatedUser>, client_addr: &str) -> Resolution {
        if self.is_exempt(path) {
            return Resolution::Exempt;
        }

        if user.is_some_and(|u| u.is_admin) {
            return Resolution::Bypass;
        }

        let (base_key, tier) = match user {
            Some(user) => (format!("user:{}", user.id), user.tier()),
            None => (format!("ip:{client_addr}"), DEFAULT_TIER.to_string()),
        };

        if let Some((endpoint, policy)) = self.endpoint_for(path) {
            return Resolution::Limited(Quota {
                key: format!("{base_key}:{endpoint}"),
                limit: policy.limit,
                window: policy.window(),
                tier,
                endpoint: Some(endpoint.to_string()),
            });
        }

        let (limit, window) = match user {
            Some(_) => {
                let scaled = (self.authenticated.limit as f64 * self.multiplier(&tier)).floor();
                (scaled.max(0.0) as u64, self.authenticated.window())
            }
            None => (self.anonymous.limit, self.anonymous.window()),
        };

        Resolution::Limited(Quota {
            key: base_key,
            limit,
            window,
            tier,
            endpoint: None,
        })
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}
