//! Operational endpoints for breakers and rate limits.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::breaker::BreakerRegistry;
use crate::ratelimit::{AuthenticatedUser, RateLimiter};

/// Window used by the usage endpoint when none is given.
const DEFAULT_USAGE_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: Arc<BreakerRegistry>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    window: Option<u64>,
}

/// Routes under `/admin`, open only to admin callers.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/breakers", get(list_breakers))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{name}", get(breaker_stats))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route(
            "/admin/rate-limits/{*key}",
            get(rate_limit_usage).delete(reset_rate_limit),
        )
        .route_layer(middleware::from_fn(require_admin))
        .with_state(state)
}

/// Reject callers without an admin [`AuthenticatedUser`] extension.
async fn require_admin(request: Request<Body>, next: Next) -> Response {
    let is_admin = request
        .extensions()
        .get::<AuthenticatedUser>()
        .is_some_and(|user| user.is_admin);

    if !is_admin {
        warn!(path = %request.uri().path(), "Admin route refused");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Admin access required" })),
        )
            .into_response();
    }
    next.run(request).await
}

fn unknown_breaker(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Unknown circuit breaker", "name": name })),
    )
        .into_response()
}

async fn list_breakers(State(state): State<AdminState>) -> Response {
    Json(state.registry.summary()).into_response()
}

async fn breaker_stats(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.registry.stats(&name) {
        Some(stats) => Json(stats).into_response(),
        None => unknown_breaker(&name),
    }
}

async fn reset_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    if !state.registry.reset(&name) {
        return unknown_breaker(&name);
    }
    info!(breaker = %name, "Circuit breaker reset via admin endpoint");
    Json(json!({ "name": name, "reset": true, "stats": state.registry.stats(&name) })).into_response()
}

async fn reset_all_breakers(State(state): State<AdminState>) -> Response {
    state.registry.reset_all();
    info!(count = state.registry.len(), "All circuit breakers reset via admin endpoint");
    Json(json!({ "reset": true, "summary": state.registry.summary() })).into_response()
}

async fn rate_limit_usage(
    State(state): State<AdminState>,
    Path(key): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Response {
    let window_secs = query.window.unwrap_or(DEFAULT_USAGE_WINDOW_SECS);
    if window_secs == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "window must be greater than zero" })),
        )
            .into_response();
    }

    let usage = state
        .limiter
        .get_current_usage(&key, Duration::from_secs(window_secs))
        .await;

    Json(json!({
        "key": key,
        "window": window_secs,
        "current": usage.current,
        "reset": usage.reset,
        "reset_iso": usage.reset_iso,
        "fallback": usage.fallback,
    }))
    .into_response()
}

async fn reset_rate_limit(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    state.limiter.reset_limit(&key).await;
    Json(json!({ "key": key, "reset": true })).into_response()
}
