//! Sliding-window rate limiting.

mod limiter;
mod local;
mod policy;
mod redis_store;
mod store;

pub use limiter::{RateLimitDecision, RateLimiter, Usage};
pub use local::LocalWindowStore;
pub use policy::{AuthenticatedUser, PolicySet, Quota, Resolution, DEFAULT_TIER};
pub use redis_store::RedisWindowStore;
pub use store::{StoreError, WindowSnapshot, WindowStore};
