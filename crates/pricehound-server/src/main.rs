use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pricehound_client::{DEFAULT_TIMEOUT, default_adapters};
use pricehound_core::traits::SessionBackend;
use pricehound_core::{EngineConfig, PriceSearchService};
use pricehound_server::routes;
use pricehound_server::state::AppState;

/// Batch requests are the largest bodies the API accepts.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricehound=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("PRICEHOUND_SERVER_API_KEY")
        .context("PRICEHOUND_SERVER_API_KEY must be set")?;
    let port = std::env::var("PRICEHOUND_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let per_second = env_u64("PRICEHOUND_SERVER_RATE_PER_SECOND", 2)?;
    let burst = env_u64("PRICEHOUND_SERVER_RATE_BURST", 10)?;

    let config = EngineConfig::from_env()?;
    let adapters = default_adapters(config.source_timeout.unwrap_or(DEFAULT_TIMEOUT));
    let service = Arc::new(PriceSearchService::from_config(
        &config,
        session_backend().await?,
        adapters,
    ));

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        api_key,
    });

    let governor = GovernorConfigBuilder::default()
        .per_second(per_second)
        .burst_size(u32::try_from(burst).context("PRICEHOUND_SERVER_RATE_BURST is too large")?)
        .finish()
        .context("Rate limit must be greater than zero")?;

    let app = routes::router(state)
        .layer(GovernorLayer::new(Arc::new(governor)))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    service.shutdown();
    Ok(())
}

#[cfg(feature = "browser")]
async fn session_backend() -> anyhow::Result<Arc<dyn SessionBackend>> {
    let backend = pricehound_client::BrowserBackend::launch().await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "browser"))]
async fn session_backend() -> anyhow::Result<Arc<dyn SessionBackend>> {
    Ok(Arc::new(pricehound_client::HttpBackend::new()))
}

fn env_u64(key: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
