use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use guardrail::breaker::BreakerRegistry;
use guardrail::clock::SystemClock;
use guardrail::config::ServiceConfig;
use guardrail::http::{build_router, HttpServer};
use guardrail::ratelimit::{PolicySet, RateLimiter};

const DEFAULT_LOG_FILTER: &str = "guardrail=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "guardrail", version, about = "Circuit breakers and distributed rate limiting")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the shared rate limit store address
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting Guardrail Resilience Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    if let Some(url) = cli.redis_url {
        config.rate_limiting.redis_url = Some(url);
    }
    info!(
        bind_addr = %config.server.bind_addr,
        breakers = config.breakers.len(),
        shared_store = config.rate_limiting.redis_url.is_some(),
        "Configuration loaded"
    );

    let clock = SystemClock::shared();
    let registry = Arc::new(BreakerRegistry::from_config(&config.breakers, clock.clone()));

    let limiter = Arc::new(RateLimiter::new(&config.rate_limiting, clock));
    limiter.connect().await;
    let sweeper = limiter.spawn_sweeper(config.rate_limiting.sweep_interval());
    info!(connected = limiter.is_connected(), "Rate limiter initialized");

    let policies = PolicySet::from_config(&config.rate_limiting);
    let router = build_router(registry, limiter.clone(), policies);

    HttpServer::new(config.server.bind_addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    limiter.close().await;

    info!("Guardrail Resilience Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
