//! Sliding-window rate limiter with a shared store and local fallback.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::local::LocalWindowStore;
use super::redis_store::RedisWindowStore;
use super::store::{StoreError, WindowSnapshot, WindowStore};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::clock::{iso_from_epoch, Clock};
use crate::config::RateLimitingConfig;

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    /// Admissions left in the window after this one (0 when rejected)
    pub remaining: u64,
    /// Epoch seconds at which the oldest admission in the window expires
    pub reset: i64,
    pub reset_iso: String,
    /// Admissions in the window including this one if it was admitted
    pub current: u64,
    /// True when the decision came from this process's local store
    pub fallback: bool,
}

/// Read-only view of an identity's window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub current: u64,
    pub reset: i64,
    pub reset_iso: String,
    pub fallback: bool,
}

fn reset_at(snapshot: &WindowSnapshot, now: f64, window: Duration) -> i64 {
    let base = snapshot.oldest.unwrap_or(now);
    (base + window.as_secs_f64()).floor() as i64
}

fn decide(snapshot: WindowSnapshot, limit: u64, now: f64, window: Duration, fallback: bool) -> RateLimitDecision {
    let reset = reset_at(&snapshot, now, window);
    let (remaining, current) = if snapshot.allowed {
        (limit - snapshot.count - 1, snapshot.count + 1)
    } else {
        (0, snapshot.count)
    };

    RateLimitDecision {
        allowed: snapshot.allowed,
        limit,
        remaining,
        reset,
        reset_iso: iso_from_epoch(reset),
        current,
        fallback,
    }
}

/// Rate limiter shared by every request handler.
///
/// Decisions come from the shared store while it is connected and answering;
/// any store failure moves that single check onto the local store and tags it
/// `fallback`. Store errors never reach callers. Shared store calls go through
/// a breaker, so an unresponsive store costs one timeout per backoff period
/// instead of one per request.
pub struct RateLimiter {
    redis_url: Option<String>,
    key_prefix: String,
    /// Bound on connecting and on each shared store operation
    store_timeout: Duration,
    shared: RwLock<Option<Arc<dyn WindowStore>>>,
    store_breaker: CircuitBreaker,
    local: LocalWindowStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key_prefix", &self.key_prefix)
            .field("connected", &self.is_connected())
            .field("local_keys", &self.local.len())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter from configuration. Call [`connect`](Self::connect)
    /// before serving to use the shared store.
    pub fn new(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            key_prefix: config.key_prefix.clone(),
            store_timeout: config.connect_timeout(),
            shared: RwLock::new(None),
            store_breaker: CircuitBreaker::new("rate_limit_store", config.store_breaker.clone(), clock.clone()),
            local: LocalWindowStore::new(config.local_max_keys),
            clock,
        }
    }

    /// A limiter that only ever uses the local store.
    pub fn local_only(clock: Arc<dyn Clock>) -> Self {
        let config = RateLimitingConfig {
            redis_url: None,
            ..RateLimitingConfig::default()
        };
        Self::new(&config, clock)
    }

    /// Use `store` as the shared store, replacing any current one.
    pub fn attach_store(&self, store: Arc<dyn WindowStore>) {
        *self.shared.write() = Some(store);
        self.store_breaker.reset();
    }

    /// Breaker guarding shared store calls.
    pub fn store_breaker(&self) -> &CircuitBreaker {
        &self.store_breaker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Try to reach the shared store. Never fails: when it cannot connect
    /// the limiter stays in local mode and logs why.
    pub async fn connect(&self) {
        let Some(url) = self.redis_url.as_deref() else {
            info!("No shared rate limit store configured, using local rate limiting");
            return;
        };

        match tokio::time::timeout(self.store_timeout, RedisWindowStore::connect(url, &self.key_prefix)).await {
            Ok(Ok(store)) => self.attach_store(Arc::new(store)),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to connect to shared rate limit store, using local fallback");
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Timed out connecting to shared rate limit store, using local fallback"
                );
            }
        }
    }

    /// Drop the shared store. Later checks use the local store.
    pub async fn close(&self) {
        if self.shared.write().take().is_some() {
            info!("Shared rate limit store connection closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.read().is_some()
    }

    /// Number of identities tracked by the local store.
    pub fn local_key_count(&self) -> usize {
        self.local.len()
    }

    fn shared_store(&self) -> Option<Arc<dyn WindowStore>> {
        self.shared.read().clone()
    }

    fn now(&self) -> f64 {
        self.clock.epoch_secs()
    }

    /// Run one shared store operation under the store breaker and timeout.
    /// An open breaker yields [`StoreError::Unavailable`] without touching
    /// the store.
    async fn guarded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.store_timeout;
        let result = self
            .store_breaker
            .call(move || async move {
                match tokio::time::timeout(timeout, operation).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open(_)) => Err(StoreError::Unavailable),
            Err(BreakerError::Failure(e)) => Err(e),
        }
    }

    /// Check and record one request for `key` against `limit` per `window`.
    ///
    /// `limit` of 0 rejects everything.
    pub async fn check_rate_limit(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
        let now = self.now();

        if let Some(store) = self.shared_store() {
            match self.guarded(store.admit(key, now, limit, window)).await {
                Ok(snapshot) => {
                    let decision = decide(snapshot, limit, now, window, false);
                    trace!(key = %key, allowed = decision.allowed, current = decision.current, "Rate limit checked");
                    return decision;
                }
                Err(StoreError::Unavailable) => {
                    trace!(key = %key, "Shared store breaker open, using local fallback");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Shared store check failed, using local fallback");
                }
            }
        }

        let snapshot = self.local.record(key, now, limit, window);
        let decision = decide(snapshot, limit, now, window, true);
        trace!(key = %key, allowed = decision.allowed, current = decision.current, "Rate limit checked locally");
        decision
    }

    /// Report `key`'s window without consuming quota.
    pub async fn get_current_usage(&self, key: &str, window: Duration) -> Usage {
        let now = self.now();

        let (snapshot, fallback) = match self.shared_store() {
            Some(store) => match self.guarded(store.usage(key, now, window)).await {
                Ok(snapshot) => (snapshot, false),
                Err(e) => {
                    if !matches!(e, StoreError::Unavailable) {
                        warn!(key = %key, error = %e, "Shared store usage query failed, using local fallback");
                    }
                    (self.local.peek(key, now, window), true)
                }
            },
            None => (self.local.peek(key, now, window), true),
        };

        let reset = reset_at(&snapshot, now, window);
        Usage {
            current: snapshot.count,
            reset,
            reset_iso: iso_from_epoch(reset),
            fallback,
        }
    }

    /// Forget `key` in the shared store (when connected) and locally.
    pub async fn reset_limit(&self, key: &str) {
        if let Some(store) = self.shared_store() {
            if let Err(e) = self.guarded(store.clear(key)).await {
                warn!(key = %key, error = %e, "Failed to reset shared rate limit");
            }
        }
        self.local.remove(key);
        info!(key = %key, "Rate limit reset");
    }

    /// Remove idle identities from the local store.
    pub fn sweep_idle(&self) -> usize {
        self.local.sweep(self.now())
    }

    /// Sweep the local store every `every` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, stopping sweeper");
                    break;
                };
                limiter.sweep_idle();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);
    const START: i64 = 1_700_000_000;

    /// Shared store stand-in that always times out and counts its calls.
    #[derive(Default)]
    struct BrokenStore {
        calls: AtomicUsize,
    }

    impl BrokenStore {
        fn fail<T>(&self) -> Result<T, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout(Duration::from_millis(500)))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WindowStore for BrokenStore {
        async fn admit(&self, _: &str, _: f64, _: u64, _: Duration) -> Result<WindowSnapshot, StoreError> {
            self.fail()
        }

        async fn usage(&self, _: &str, _: f64, _: Duration) -> Result<WindowSnapshot, StoreError> {
            self.fail()
        }

        async fn clear(&self, _: &str) -> Result<(), StoreError> {
            self.fail()
        }
    }

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::at_epoch(START);
        (RateLimiter::local_only(Arc::new(clock.clone())), clock)
    }

    /// A limiter whose "shared" store is a separate in-memory store.
    fn shared_limiter() -> (RateLimiter, ManualClock) {
        let (limiter, clock) = limiter();
        limiter.attach_store(Arc::new(LocalWindowStore::new(100)));
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_rejects() {
        let (limiter, _) = shared_limiter();

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let decision = limiter.check_rate_limit("user:1", 3, MINUTE).await;
            assert!(decision.allowed);
            assert!(!decision.fallback);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let rejected = limiter.check_rate_limit("user:1", 3, MINUTE).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.current, 3);
        assert_eq!(rejected.reset, START + 60);
        assert_eq!(rejected.reset_iso, "2023-11-14T22:14:20+00:00");
    }

    #[tokio::test]
    async fn test_window_slides_past_old_admissions() {
        let (limiter, clock) = shared_limiter();

        assert!(limiter.check_rate_limit("k", 1, MINUTE).await.allowed);
        clock.advance(Duration::from_secs(30));
        assert!(!limiter.check_rate_limit("k", 1, MINUTE).await.allowed);

        clock.advance(Duration::from_millis(30_001));
        let decision = limiter.check_rate_limit("k", 1, MINUTE).await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }

    #[tokio::test]
    async fn test_zero_limit_rejects() {
        let (limiter, _) = limiter();
        let decision = limiter.check_rate_limit("k", 0, MINUTE).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_locally() {
        let (limiter, _) = limiter();
        limiter.attach_store(Arc::new(BrokenStore::default()));
        assert!(limiter.is_connected());

        let first = limiter.check_rate_limit("k", 2, MINUTE).await;
        assert!(first.allowed);
        assert!(first.fallback);
        assert_eq!(first.remaining, 1);

        limiter.check_rate_limit("k", 2, MINUTE).await;
        let third = limiter.check_rate_limit("k", 2, MINUTE).await;
        assert!(!third.allowed);
        assert!(third.fallback);

        // The store is kept for when it recovers
        assert!(limiter.is_connected());

        let usage = limiter.get_current_usage("k", MINUTE).await;
        assert!(usage.fallback);
        assert_eq!(usage.current, 2);
    }

    #[tokio::test]
    async fn test_failing_store_is_skipped_until_backoff_elapses() {
        let (limiter, clock) = limiter();
        let store = Arc::new(BrokenStore::default());
        limiter.attach_store(store.clone());

        // Default store breaker opens after 3 failures
        for _ in 0..3 {
            assert!(limiter.check_rate_limit("k", 100, MINUTE).await.fallback);
        }
        assert_eq!(store.calls(), 3);
        assert_eq!(limiter.store_breaker().state(), crate::breaker::BreakerState::Open);

        for _ in 0..20 {
            let decision = limiter.check_rate_limit("k", 100, MINUTE).await;
            assert!(decision.allowed);
            assert!(decision.fallback);
        }
        limiter.get_current_usage("k", MINUTE).await;
        assert_eq!(store.calls(), 3);

        // One trial call after the backoff, which fails and reopens
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check_rate_limit("k", 100, MINUTE).await.fallback);
        assert!(limiter.check_rate_limit("k", 100, MINUTE).await.fallback);
        assert_eq!(store.calls(), 4);
        assert_eq!(limiter.store_breaker().state(), crate::breaker::BreakerState::Open);

        // A new store starts with a closed breaker
        let fresh = Arc::new(BrokenStore::default());
        limiter.attach_store(fresh.clone());
        limiter.check_rate_limit("k", 100, MINUTE).await;
        assert_eq!(fresh.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_only_decisions_are_tagged() {
        let (limiter, _) = limiter();
        assert!(!limiter.is_connected());
        assert!(limiter.check_rate_limit("k", 5, MINUTE).await.fallback);
    }

    #[tokio::test]
    async fn test_connect_unreachable_stays_local() {
        let config = RateLimitingConfig {
            redis_url: Some("redis://127.0.0.1:1/".to_string()),
            connect_timeout_ms: 200,
            ..RateLimitingConfig::default()
        };
        let limiter = RateLimiter::new(&config, Arc::new(ManualClock::at_epoch(START)));

        limiter.connect().await;
        assert!(!limiter.is_connected());
        assert!(limiter.check_rate_limit("k", 1, MINUTE).await.fallback);
    }

    #[tokio::test]
    async fn test_connect_invalid_url_stays_local() {
        let config = RateLimitingConfig {
            redis_url: Some("definitely-not-redis".to_string()),
            ..RateLimitingConfig::default()
        };
        let limiter = RateLimiter::new(&config, Arc::new(ManualClock::at_epoch(START)));

        limiter.connect().await;
        assert!(!limiter.is_connected());
    }

    #[tokio::test]
    async fn test_reset_limit_clears_history() {
        let (limiter, _) = shared_limiter();
        for _ in 0..3 {
            limiter.check_rate_limit("k", 3, MINUTE).await;
        }
        assert!(!limiter.check_rate_limit("k", 3, MINUTE).await.allowed);

        limiter.reset_limit("k").await;

        let decision = limiter.check_rate_limit("k", 3, MINUTE).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_usage_does_not_consume() {
        let (limiter, clock) = shared_limiter();
        limiter.check_rate_limit("k", 2, MINUTE).await;
        clock.advance(Duration::from_secs(5));

        for _ in 0..5 {
            let usage = limiter.get_current_usage("k", MINUTE).await;
            assert_eq!(usage.current, 1);
            assert_eq!(usage.reset, START + 60);
            assert!(!usage.fallback);
        }

        assert!(limiter.check_rate_limit("k", 2, MINUTE).await.allowed);

        let empty = limiter.get_current_usage("nobody", MINUTE).await;
        assert_eq!(empty.current, 0);
        assert_eq!(empty.reset, START + 65);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_admit_exactly_limit() {
        let (limiter, _) = shared_limiter();
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(tokio::sync::Barrier::new(50));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    limiter.check_rate_limit("hot", 10, MINUTE).await
                })
            })
            .collect();

        let mut decisions = Vec::new();
        for handle in handles {
            decisions.push(handle.await.unwrap());
        }

        let allowed: Vec<_> = decisions.iter().filter(|d| d.allowed).collect();
        assert_eq!(allowed.len(), 10);
        let remaining: BTreeSet<u64> = allowed.iter().map(|d| d.remaining).collect();
        assert_eq!(remaining, (0..10).collect::<BTreeSet<u64>>());
        assert!(decisions.iter().all(|d| !d.fallback));
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_local_keys() {
        let (limiter, clock) = limiter();
        limiter.check_rate_limit("a", 5, Duration::from_secs(10)).await;
        limiter.check_rate_limit("b", 5, MINUTE).await;
        assert_eq!(limiter.local_key_count(), 2);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.local_key_count(), 1);
    }

    #[tokio::test]
    async fn test_close_returns_to_local_mode() {
        let (limiter, _) = shared_limiter();
        assert!(limiter.is_connected());

        limiter.close().await;
        assert!(!limiter.is_connected());
        assert!(limiter.check_rate_limit("k", 1, MINUTE).await.fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_limiter_dropped() {
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let handle = limiter.spawn_sweeper(Duration::from_secs(1));

        drop(limiter);
        tokio::time::advance(Duration::from_secs(2)).await;

        tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(5), handle).await);
    }
}
