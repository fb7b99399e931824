//! Axum middleware applying rate limit policies to every request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::responses::{
    insert_usage_headers, RateLimited, X_RATELIMIT_ADMIN, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET, X_RATELIMIT_TIER,
};
use crate::ratelimit::{AuthenticatedUser, PolicySet, RateLimiter, Resolution};

/// Seconds added to "now" in the reset header sent to admin callers.
const ADMIN_RESET_SECS: i64 = 3600;

/// State shared by the rate limit middleware.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub policies: Arc<PolicySet>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, policies: PolicySet) -> Self {
        Self {
            limiter,
            policies: Arc::new(policies),
        }
    }
}

/// Client address from the connection, or `unknown` when the server was not
/// started with connect info.
fn client_address(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware function for rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let user = request.extensions().get::<AuthenticatedUser>().cloned();
    let client = client_address(&request);

    let quota = match state.policies.resolve(&path, user.as_ref(), &client) {
        Resolution::Exempt => return next.run(request).await,
        Resolution::Bypass => {
            debug!(path = %path, "Admin request bypasses rate limiting");
            let reset = state.limiter.clock().now().timestamp() + ADMIN_RESET_SECS;

            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from_static("unlimited"));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("unlimited"));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
            headers.insert(X_RATELIMIT_ADMIN, HeaderValue::from_static("true"));
            return response;
        }
        Resolution::Limited(quota) => quota,
    };

    let decision = state
        .limiter
        .check_rate_limit(&quota.key, quota.limit, quota.window)
        .await;

    if !decision.allowed {
        warn!(
            key = %quota.key,
            path = %path,
            limit = decision.limit,
            current = decision.current,
            "Rate limit exceeded"
        );
        let now = state.limiter.clock().now().timestamp();
        return RateLimited::new(&decision, now).into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    insert_usage_headers(headers, &decision);
    if let Ok(tier) = HeaderValue::from_str(&quota.tier) {
        headers.insert(X_RATELIMIT_TIER, tier);
    }
    response
}
