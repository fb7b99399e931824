//! Named circuit breakers constructed once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::circuit::{BreakerState, BreakerStats, CircuitBreaker};
use crate::clock::Clock;
use crate::config::{default_breakers, BreakerConfig};

/// Health score at or above which a closed breaker is "healthy".
const HEALTHY_THRESHOLD: f64 = 80.0;
/// Health score at or above which a closed breaker is "degraded".
const DEGRADED_THRESHOLD: f64 = 50.0;

/// Dashboard bucket for a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBucket {
    Healthy,
    Degraded,
    Open,
    Unhealthy,
}

impl HealthBucket {
    /// Open breakers are bucketed as open whatever their score.
    pub fn of(stats: &BreakerStats) -> Self {
        if stats.state == BreakerState::Open {
            HealthBucket::Open
        } else if stats.health_score >= HEALTHY_THRESHOLD {
            HealthBucket::Healthy
        } else if stats.health_score >= DEGRADED_THRESHOLD {
            HealthBucket::Degraded
        } else {
            HealthBucket::Unhealthy
        }
    }
}

/// Summary of every breaker in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub open: usize,
    pub unhealthy: usize,
    pub breakers: Vec<BreakerStats>,
}

/// Holder of the process's named breakers.
///
/// Built once and handed to collaborators by reference (usually inside an
/// `Arc`), so tests can build isolated registries.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Build a registry from per-name configuration.
    pub fn from_config<'a>(
        configs: impl IntoIterator<Item = (&'a String, &'a BreakerConfig)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breakers: BTreeMap<_, _> = configs
            .into_iter()
            .map(|(name, config)| {
                let breaker = CircuitBreaker::new(name.clone(), config.clone(), Arc::clone(&clock));
                (name.clone(), Arc::new(breaker))
            })
            .collect();

        info!(
            breakers = ?breakers.keys().collect::<Vec<_>>(),
            "Circuit breaker registry initialized"
        );

        Self { breakers }
    }

    /// The `exchange_api`, `database` and `ml_service` breakers.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::from_config(&default_breakers(), clock)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.breakers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn stats(&self, name: &str) -> Option<BreakerStats> {
        self.breakers.get(name).map(|b| b.stats())
    }

    /// Reset one breaker. Returns `false` for an unknown name.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.values() {
            breaker.reset();
        }
    }

    pub fn summary(&self) -> RegistrySummary {
        let breakers: Vec<BreakerStats> = self.breakers.values().map(|b| b.stats()).collect();

        let mut summary = RegistrySummary {
            total: breakers.len(),
            healthy: 0,
            degraded: 0,
            open: 0,
            unhealthy: 0,
            breakers: Vec::new(),
        };

        for stats in &breakers {
            match HealthBucket::of(stats) {
                HealthBucket::Healthy => summary.healthy += 1,
                HealthBucket::Degraded => summary.degraded += 1,
                HealthBucket::Open => summary.open += 1,
                HealthBucket::Unhealthy => summary.unhealthy += 1,
            }
        }

        summary.breakers = breakers;
        summary
    }
}
