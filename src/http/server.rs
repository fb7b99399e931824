//! HTTP server hosting the health and admin routes behind the rate limiter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::admin::{admin_router, AdminState};
use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::breaker::BreakerRegistry;
use crate::error::{GuardrailError, Result};
use crate::ratelimit::{PolicySet, RateLimiter};

/// Build the service router: `/health`, the admin routes and the rate limit
/// middleware in front of all of them.
pub fn build_router(registry: Arc<BreakerRegistry>, limiter: Arc<RateLimiter>, policies: PolicySet) -> Router {
    let admin = AdminState {
        registry,
        limiter: limiter.clone(),
    };
    let rate_limit = RateLimitState::new(limiter.clone(), policies);

    Router::new()
        .route("/health", get(health).with_state(limiter))
        .merge(admin_router(admin))
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(limiter): State<Arc<RateLimiter>>) -> Json<Value> {
    let mode = if limiter.is_connected() { "shared" } else { "local" };
    Json(json!({
        "status": "ok",
        "rate_limit_mode": mode,
        "store_breaker": limiter.store_breaker().state(),
    }))
}

/// HTTP server for the guardrail service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GuardrailError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GuardrailError::Io(e)
            })?;

        info!("HTTP server stopped");
        Ok(())
    }
}
