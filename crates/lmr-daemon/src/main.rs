//! lmr-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects storage, wires the engine, and starts the status server. Route
//! handlers live in `routes.rs`; shared state types live in `state.rs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use lmr_config::{load_layered_yaml, Credentials, EngineConfig, LoadedConfig};
use lmr_crm::{CrmApi, HttpCrmClient};
use lmr_daemon::{routes, state};
use lmr_db::{PgStorage, Storage};
use lmr_engine::{ActiveSet, PairRunner, Scheduler};
use lmr_net::{Deadlines, RateLimiter, RetryPolicy};
use lmr_pages::{HttpPagesClient, PagesApi};

/// Comma-separated YAML layers, e.g. `config/base.yaml,config/prod.yaml`.
const ENV_CONFIG: &str = "LMR_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file
    // does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let config = EngineConfig::from_loaded(&loaded);
    let credentials = Credentials::from_env()?;

    let pool = lmr_db::connect_from_env().await?;
    lmr_db::migrate(&pool).await?;
    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));

    let retry = RetryPolicy::new(
        config.retry_max_attempts,
        Duration::from_millis(config.retry_base_delay_ms),
    );
    let deadlines = Deadlines {
        list_ops: Duration::from_millis(config.list_timeout_ms),
        record_ops: Duration::from_millis(config.record_timeout_ms),
    };

    let crm: Arc<dyn CrmApi> = Arc::new(HttpCrmClient::new(
        credentials.crm_base_url,
        credentials.crm_api_key,
        RateLimiter::new(config.rate_limit_crm),
        retry,
        deadlines,
    ));
    let pages: Arc<dyn PagesApi> = Arc::new(HttpPagesClient::new(
        credentials.pages_base_url,
        credentials.pages_token,
        RateLimiter::new(config.rate_limit_pages),
        retry,
        deadlines,
    ));

    let active = ActiveSet::new();
    let shutdown = CancellationToken::new();
    let runner = Arc::new(PairRunner::new(
        crm,
        pages,
        Arc::clone(&storage),
        config,
        loaded.config_hash.clone(),
        active.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(runner, storage, active, shutdown));
    scheduler.initialize().await?;

    let shared = Arc::new(state::AppState::new(Arc::clone(&scheduler)));
    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8710)));
    info!("lmr-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await
        .context("server crashed")?;

    Ok(())
}

fn load_config() -> anyhow::Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG) {
        Ok(paths) => {
            let layers: Vec<&str> = paths.split(',').map(str::trim).collect();
            load_layered_yaml(&layers)
        }
        Err(_) => Ok(LoadedConfig::empty()),
    }
}

async fn shutdown_signal(scheduler: Arc<Scheduler>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received; stopping tickers and in-flight runs");
    scheduler.shutdown();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(lmr_config::ENV_DAEMON_ADDR).ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
