//! HTTP surface: rate limit middleware, admin routes and the server.

mod admin;
mod middleware;
mod responses;
mod server;

pub use admin::{admin_router, AdminState};
pub use middleware::{rate_limit_middleware, RateLimitState};
pub use responses::{
    insert_usage_headers, RateLimited, X_RATELIMIT_ADMIN, X_RATELIMIT_LIMIT, X_RATELIMIT_MODE,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_RATELIMIT_TIER,
};
pub use server::{build_router, HttpServer};
