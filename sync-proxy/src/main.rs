//! sync-proxy binary entry point.
//!
//! Usage:
//! ```bash
//! sync-proxy --config proxy.toml
//! ```
//!
//! Runs the proxy core with an in-memory room store, the idle-connection
//! cleanup task and the health/metrics HTTP endpoints.

use anyhow::Context;
use sliding_sync_proxy::cleanup::spawn_cleanup_task;
use sliding_sync_proxy::config::Config;
use sliding_sync_proxy::http::build_router;
use sliding_sync_proxy::server::SyncProxy;
use sliding_sync_proxy::store::MemoryRoomStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::warn!(
            "Config file {:?} not found, using defaults",
            config_path
        );
        Config::default()
    };

    let proxy = Arc::new(SyncProxy::new(
        config.clone(),
        Arc::new(MemoryRoomStore::new()),
    ));
    let cleanup = spawn_cleanup_task(proxy.clone(), config.cleanup.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.http_bind_address))?;
    tracing::info!(
        "sync-proxy v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        config.server.http_bind_address
    );

    axum::serve(listener, build_router(proxy))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    tracing::info!("sync-proxy stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("proxy.toml"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
