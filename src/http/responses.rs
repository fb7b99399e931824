//! HTTP representations of limiter and breaker conditions.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::breaker::BreakerOpen;
use crate::ratelimit::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_TIER: HeaderName = HeaderName::from_static("x-ratelimit-tier");
pub const X_RATELIMIT_MODE: HeaderName = HeaderName::from_static("x-ratelimit-mode");
pub const X_RATELIMIT_ADMIN: HeaderName = HeaderName::from_static("x-ratelimit-admin");

/// Write the limit, remaining and reset headers for `decision`.
pub fn insert_usage_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset));
    if decision.fallback {
        headers.insert(X_RATELIMIT_MODE, HeaderValue::from_static("local"));
    }
}

/// A request rejected by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit of {limit} exceeded; retry in {retry_after}s")]
pub struct RateLimited {
    pub limit: u64,
    pub reset: i64,
    pub reset_iso: String,
    /// Whole seconds until the window frees a slot, at least 1
    pub retry_after: u64,
    pub fallback: bool,
}

impl RateLimited {
    /// Build from a rejected decision at epoch second `now`.
    pub fn new(decision: &RateLimitDecision, now: i64) -> Self {
        Self {
            limit: decision.limit,
            reset: decision.reset,
            reset_iso: decision.reset_iso.clone(),
            retry_after: (decision.reset - now).max(1) as u64,
            fallback: decision.fallback,
        }
    }
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = json!({
            "error": "Rate limit exceeded",
            "message": format!("Too many requests. Please try again in {} seconds.", self.retry_after),
            "limit": self.limit,
            "remaining": 0,
            "reset": self.reset,
            "reset_iso": self.reset_iso,
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        if self.fallback {
            headers.insert(X_RATELIMIT_MODE, HeaderValue::from_static("local"));
        }
        response
    }
}

impl IntoResponse for BreakerOpen {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after.as_secs_f64().ceil().max(1.0) as u64;
        let body = json!({
            "error": "Service temporarily unavailable",
            "dependency": self.name,
            "retry_after": retry_after,
        });

        let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}
