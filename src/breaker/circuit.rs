//! Per-dependency circuit breaker.
//!
//! # States
//! - Closed: calls pass through; tripping failures are counted
//! - Open: calls are rejected until the backoff since the last failure elapses
//! - Half-Open: a limited number of trial calls test for recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      failure_count >= failure_threshold
//! Open      → Half-Open: a call arrives and elapsed >= backoff(failure_count)
//! Half-Open → Closed:    half_open_max_calls trial successes
//! Half-Open → Open:      any tripping failure
//! ```
//!
//! Backoff is `min(timeout * 2^min(failure_count - threshold, 5), timeout * 10)`,
//! with the exponent floored at zero.
//!
//! All state lives behind one mutex per breaker. The lock is held only for the
//! admission decision and for recording the outcome, never across the wrapped
//! operation.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::kind::{Classify, FailureKind};
use crate::clock::Clock;
use crate::config::BreakerConfig;

/// Maximum outcomes retained for the success-rate figure.
const HISTORY_CAPACITY: usize = 100;
/// Ceiling on the backoff exponent.
const MAX_BACKOFF_EXPONENT: u32 = 5;
/// Ceiling on the backoff as a multiple of the configured timeout.
const MAX_BACKOFF_MULTIPLIER: u32 = 10;

const INITIAL_HEALTH: f64 = 100.0;
const HEALTH_FAILURE_PENALTY: f64 = 5.0;
const HEALTH_SUCCESS_BONUS: f64 = 2.0;
const HEALTH_RECOVERY_BONUS: f64 = 10.0;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// A call was refused because the breaker is protecting its dependency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open; retry in {:.1}s", .retry_after.as_secs_f64())]
pub struct BreakerOpen {
    /// The breaker that refused the call
    pub name: String,
    /// Remaining backoff before a trial call will be admitted
    pub retry_after: Duration,
}

/// Outcome of a call that did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The operation was never invoked
    #[error(transparent)]
    Open(#[from] BreakerOpen),

    /// The operation's own error, unmodified
    #[error("{0}")]
    Failure(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// The wrapped failure, if the operation ran.
    pub fn into_failure(self) -> Option<E> {
        match self {
            BreakerError::Failure(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

/// Read-only snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    /// Configured timeout in seconds
    pub timeout: u64,
    /// Backoff in seconds implied by the current failure count
    pub current_backoff: f64,
    /// Percentage of successes in the retained history, two decimals
    pub success_rate: f64,
    /// Telemetry score in [0, 100], two decimals
    pub health_score: f64,
    pub history_size: usize,
}

/// Mutable breaker state, guarded by the breaker's mutex.
#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure_time: Option<DateTime<Utc>>,
    history: VecDeque<bool>,
    health_score: f64,
    /// Bumped on every entry into half-open and on reset, so that trial
    /// slots from an earlier episode are never credited or released twice.
    episode: u64,
}

impl BreakerInner {
    fn new(episode: u64) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            last_failure_time: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            health_score: INITIAL_HEALTH,
            episode,
        }
    }

    fn record_outcome(&mut self, success: bool) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    fn adjust_health(&mut self, delta: f64) {
        self.health_score = (self.health_score + delta).clamp(0.0, 100.0);
    }

    fn elapsed_since_failure(&self, now: DateTime<Utc>) -> Duration {
        match self.last_failure_time {
            Some(at) => (now - at).to_std().unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 100.0;
        }
        let successes = self.history.iter().filter(|ok| **ok).count();
        successes as f64 * 100.0 / self.history.len() as f64
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Normal pass-through while closed
    Direct,
    /// A half-open trial slot from the given episode
    Trial(u64),
}

/// Releases an unsettled half-open trial slot when a call is abandoned
/// (non-tripping failure or the caller dropping the future).
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl TrialGuard<'_> {
    fn settle(mut self) -> Admission {
        self.settled = true;
        self.admission
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Admission::Trial(episode) = self.admission {
            let mut inner = self.breaker.inner.lock();
            if inner.state == BreakerState::HalfOpen && inner.episode == episode {
                inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
                debug!(breaker = %self.breaker.name, "Released unsettled half-open trial slot");
            }
        }
    }
}

/// A circuit breaker guarding one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    trip_on: HashSet<FailureKind>,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let trip_on = config.trip_on.iter().copied().collect();
        Self {
            name: name.into(),
            config,
            trip_on,
            clock,
            inner: Mutex::new(BreakerInner::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn health_score(&self) -> f64 {
        self.inner.lock().health_score
    }

    /// Whether failures of `kind` count against this breaker.
    pub fn trips_on(&self, kind: FailureKind) -> bool {
        self.trip_on.contains(&kind)
    }

    /// Backoff for a given failure count.
    pub fn backoff_for(&self, failure_count: u32) -> Duration {
        let over = failure_count.saturating_sub(self.config.failure_threshold);
        let exponent = over.min(MAX_BACKOFF_EXPONENT);
        let timeout = self.config.timeout();

        timeout
            .saturating_mul(1u32 << exponent)
            .min(timeout.saturating_mul(MAX_BACKOFF_MULTIPLIER))
    }

    /// Backoff implied by the current failure count.
    pub fn current_backoff(&self) -> Duration {
        let failure_count = self.inner.lock().failure_count;
        self.backoff_for(failure_count)
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// Successes and tripping failures update the breaker; failures of a kind
    /// outside the configured trip set are returned untouched and leave the
    /// breaker as it was. A refused call never invokes `operation`.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let guard = TrialGuard {
            breaker: self,
            admission: self.admit()?,
            settled: false,
        };

        match operation().await {
            Ok(value) => {
                self.on_success(guard.settle());
                Ok(value)
            }
            Err(err) => {
                let kind = err.failure_kind();
                if self.trips_on(kind) {
                    self.on_failure(guard.settle(), kind);
                } else {
                    debug!(breaker = %self.name, kind = ?kind, "Ignoring non-tripping failure");
                    drop(guard);
                }
                Err(BreakerError::Failure(err))
            }
        }
    }

    /// Decide whether a call may proceed.
    fn admit(&self) -> Result<Admission, BreakerOpen> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Ok(Admission::Direct),
            BreakerState::Open => {
                let backoff = self.backoff_for(inner.failure_count);
                let elapsed = inner.elapsed_since_failure(now);

                if elapsed < backoff {
                    return Err(self.rejection(backoff - elapsed));
                }

                inner.state = BreakerState::HalfOpen;
                inner.half_open_calls = 1;
                inner.success_count = 0;
                inner.episode += 1;

                info!(
                    breaker = %self.name,
                    failure_count = inner.failure_count,
                    backoff_secs = backoff.as_secs_f64(),
                    "Circuit breaker entering half-open state"
                );
                Ok(Admission::Trial(inner.episode))
            }
            BreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    return Ok(Admission::Trial(inner.episode));
                }

                let backoff = self.backoff_for(inner.failure_count);
                let elapsed = inner.elapsed_since_failure(now);
                Err(self.rejection(backoff.saturating_sub(elapsed)))
            }
        }
    }

    fn rejection(&self, retry_after: Duration) -> BreakerOpen {
        debug!(
            breaker = %self.name,
            retry_after_secs = retry_after.as_secs_f64(),
            "Circuit breaker rejected call"
        );
        BreakerOpen {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.record_outcome(true);

        match inner.state {
            BreakerState::Closed => {
                inner.success_count += 1;
                inner.failure_count = 0;
                inner.adjust_health(HEALTH_SUCCESS_BONUS);
            }
            BreakerState::HalfOpen => {
                if admission != Admission::Trial(inner.episode) {
                    return;
                }
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_calls = 0;
                    inner.adjust_health(HEALTH_RECOVERY_BONUS);
                    info!(breaker = %self.name, "Circuit breaker closed, dependency recovered");
                }
            }
            // Admitted before the breaker opened; history only.
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, admission: Admission, kind: FailureKind) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.failure_count += 1;
        inner.last_failure_time = Some(now);
        inner.record_outcome(false);
        inner.adjust_health(-HEALTH_FAILURE_PENALTY);

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.half_open_calls = 0;
                warn!(
                    breaker = %self.name,
                    kind = ?kind,
                    trial = matches!(admission, Admission::Trial(_)),
                    failure_count = inner.failure_count,
                    "Circuit breaker reopened, failure while half-open"
                );
            }
            BreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    breaker = %self.name,
                    kind = ?kind,
                    failure_count = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Restore the initial closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let episode = inner.episode + 1;
        *inner = BreakerInner::new(episode);
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Snapshot for dashboards and the admin API.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            timeout: self.config.timeout_secs,
            current_backoff: self.backoff_for(inner.failure_count).as_secs_f64(),
            success_rate: round2(inner.success_rate()),
            health_score: round2(inner.health_score),
            history_size: inner.history.len(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Down,
        BadRequest,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Classify for TestError {
        fn failure_kind(&self) -> FailureKind {
            match self {
                TestError::Down => FailureKind::Unavailable,
                TestError::BadRequest => FailureKind::Rejected,
            }
        }
    }

    fn breaker(threshold: u32, timeout_secs: u64, half_open: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::at_epoch(1_700_000_000);
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig::new(threshold, timeout_secs, half_open),
            Arc::new(clock.clone()),
        );
        (breaker, clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        b.call(|| async { Err::<(), _>(TestError::Down) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<TestError>> {
        b.call(|| async { Ok::<_, TestError>(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_skips_operation() {
        let (b, _clock) = breaker(5, 60, 3);

        for _ in 0..5 {
            let err = fail(&b).await.unwrap_err();
            assert!(matches!(err, BreakerError::Failure(TestError::Down)));
        }
        assert_eq!(b.state(), BreakerState::Open);

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invoked);
        let result = b
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await;

        assert!(result.unwrap_err().is_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_reports_remaining_backoff() {
        let (b, clock) = breaker(2, 10, 3);

        let _ = fail(&b).await;
        let _ = fail(&b).await;

        let stats = b.stats();
        assert_eq!(stats.state, BreakerState::Open);
        assert_eq!(stats.current_backoff, 10.0);

        match succeed(&b).await {
            Err(BreakerError::Open(open)) => {
                assert_eq!(open.name, "test");
                assert_eq!(open.retry_after, Duration::from_secs(10));
            }
            other => panic!("expected BreakerOpen, got {:?}", other),
        }

        clock.advance(Duration::from_secs(4));
        let open = succeed(&b).await.unwrap_err();
        match open {
            BreakerError::Open(open) => assert_eq!(open.retry_after, Duration::from_secs(6)),
            other => panic!("expected BreakerOpen, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_half_open_quota_and_recovery() {
        let (b, clock) = breaker(2, 10, 2);
        let _ = fail(&b).await;
        let _ = fail(&b).await;

        clock.advance(Duration::from_secs(10));

        assert_eq!(assert_ok!(succeed(&b).await), 7);
        assert_eq!(b.state(), BreakerState::HalfOpen);

        assert_ok!(succeed(&b).await);
        let stats = b.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_rejects_beyond_quota() {
        let (b, clock) = breaker(1, 5, 3);
        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(5));

        let invoked = Arc::new(AtomicUsize::new(0));
        let calls = (0..10).map(|_| {
            let counter = Arc::clone(&invoked);
            b.call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok::<_, TestError>(())
            })
        });
        let results = join_all(calls).await;

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(BreakerError::Open(_))))
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(rejected, 7);
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_regardless_of_successes() {
        let (b, clock) = breaker(2, 10, 3);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(10));

        assert_ok!(succeed(&b).await);
        assert_ok!(succeed(&b).await);
        assert_eq!(b.state(), BreakerState::HalfOpen);

        assert_err!(fail(&b).await);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.stats().failure_count, 3);
        // One failure over threshold doubles the backoff
        assert_eq!(b.current_backoff(), Duration::from_secs(20));
        assert!(succeed(&b).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_non_tripping_failure_passes_through() {
        let (b, _clock) = breaker(1, 10, 1);

        let err = b
            .call(|| async { Err::<(), _>(TestError::BadRequest) })
            .await
            .unwrap_err();

        assert_eq!(err.into_failure(), Some(TestError::BadRequest));
        let stats = b.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.history_size, 0);
        assert_eq!(stats.health_score, 100.0);
    }

    #[tokio::test]
    async fn test_non_tripping_failure_releases_trial_slot() {
        let (b, clock) = breaker(1, 10, 1);
        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(10));

        let _ = b.call(|| async { Err::<(), _>(TestError::BadRequest) }).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // The slot is free again, so the next trial call is admitted and closes it
        assert_ok!(succeed(&b).await);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_releases_slot() {
        let (b, clock) = breaker(1, 10, 1);
        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(10));

        let pending = b.call(|| std::future::pending::<Result<(), TestError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        assert_ok!(succeed(&b).await);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_backoff_growth_and_caps() {
        let (b, _clock) = breaker(3, 10, 1);

        assert_eq!(b.backoff_for(0), Duration::from_secs(10));
        assert_eq!(b.backoff_for(3), Duration::from_secs(10));
        assert_eq!(b.backoff_for(4), Duration::from_secs(20));
        assert_eq!(b.backoff_for(5), Duration::from_secs(40));
        assert_eq!(b.backoff_for(6), Duration::from_secs(80));
        assert_eq!(b.backoff_for(7), Duration::from_secs(100));
        assert_eq!(b.backoff_for(50), Duration::from_secs(100));

        let mut previous = Duration::ZERO;
        for failures in 0..40 {
            let backoff = b.backoff_for(failures);
            assert!(backoff >= previous);
            assert!(backoff <= Duration::from_secs(100));
            previous = backoff;
        }
    }

    #[tokio::test]
    async fn test_health_score_stays_in_bounds() {
        let (b, _clock) = breaker(1000, 1, 1);

        for _ in 0..50 {
            let _ = fail(&b).await;
            let score = b.health_score();
            assert!((0.0..=100.0).contains(&score));
        }
        assert_eq!(b.health_score(), 0.0);

        b.reset();
        for _ in 0..50 {
            assert_ok!(succeed(&b).await);
        }
        assert_eq!(b.health_score(), 100.0);
        assert_eq!(b.stats().history_size, 50);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (b, _clock) = breaker(1000, 1, 1);

        for i in 0..150 {
            if i % 2 == 0 {
                let _ = fail(&b).await;
            } else {
                let _ = succeed(&b).await;
            }
        }

        let stats = b.stats();
        assert_eq!(stats.history_size, 100);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_reset_restores_initial_values() {
        let (b, _clock) = breaker(2, 10, 1);
        let _ = succeed(&b).await;
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        b.reset();
        b.reset();

        let stats = b.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.health_score, 100.0);
        assert_eq!(stats.history_size, 0);
        assert!(stats.last_failure_time.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_consistently() {
        let (b, _clock) = breaker(20, 60, 1);
        let b = Arc::new(b);
        let invoked = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(50));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let b = Arc::clone(&b);
                let invoked = Arc::clone(&invoked);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    b.call(move || async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(TestError::Down)
                    })
                    .await
                })
            })
            .collect();

        let mut refused = 0;
        for task in tasks {
            if task.await.unwrap().unwrap_err().is_open() {
                refused += 1;
            }
        }

        let stats = b.stats();
        let invoked = invoked.load(Ordering::SeqCst);
        assert_eq!(stats.state, BreakerState::Open);
        // Every invoked call is counted exactly once and refused calls never run
        assert_eq!(stats.failure_count as usize, invoked);
        assert_eq!(stats.history_size, invoked);
        assert_eq!(invoked + refused, 50);
        assert!(invoked >= 20);
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&BreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
