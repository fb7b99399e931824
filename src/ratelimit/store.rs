//! Storage seam for sliding-window accounting.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::breaker::{Classify, FailureKind};

/// Errors from a window store. Never surfaced by [`RateLimiter`]; a failing
/// store only moves the affected check onto the local path.
///
/// [`RateLimiter`]: super::RateLimiter
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("shared store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected shared store reply: {0}")]
    InvalidReply(String),

    /// The store breaker is open; the store was not called
    #[error("shared store unavailable")]
    Unavailable,
}

impl Classify for StoreError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::Redis(e) if e.is_timeout() => FailureKind::Timeout,
            StoreError::Redis(e) if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() => {
                FailureKind::Connection
            }
            StoreError::Redis(_) | StoreError::InvalidReply(_) => FailureKind::Internal,
            StoreError::Timeout(_) => FailureKind::Timeout,
            StoreError::Unavailable => FailureKind::Unavailable,
        }
    }
}

/// State of one identity's window, observed atomically with any admission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    /// Whether a new timestamp was recorded
    pub allowed: bool,
    /// Timestamps inside the window before this admission
    pub count: u64,
    /// Oldest timestamp still inside the window (after any admission)
    pub oldest: Option<f64>,
}

/// Trait for sliding-window stores.
///
/// Implementations must make each method atomic per key: pruning, counting
/// and the conditional append in [`admit`](WindowStore::admit) cannot
/// interleave with another call for the same key.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Prune timestamps at or before `now - window`, count the rest and,
    /// when the count is below `limit`, record `now`.
    async fn admit(
        &self,
        key: &str,
        now: f64,
        limit: u64,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Same prune and count as `admit`, without recording anything.
    async fn usage(&self, key: &str, now: f64, window: Duration) -> Result<WindowSnapshot, StoreError>;

    /// Forget all history for `key`.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_trip_breakers() {
        let timeout = StoreError::Timeout(Duration::from_secs(2));
        let reply = StoreError::InvalidReply("nan".to_string());

        assert_eq!(timeout.failure_kind(), FailureKind::Timeout);
        assert_eq!(reply.failure_kind(), FailureKind::Internal);
        assert_eq!(StoreError::Unavailable.failure_kind(), FailureKind::Unavailable);
        assert!(FailureKind::default_trip_set().contains(&reply.failure_kind()));
    }
}
