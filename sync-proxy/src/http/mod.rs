//! HTTP endpoints for sync-proxy.
//!
//! Provides health checks and Prometheus metrics. The sync endpoint itself
//! belongs to the transport in front of the proxy.

mod health;
mod metrics;

use crate::server::SyncProxy;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::{HealthStatus, BACKLOG_PER_CONNECTION};

/// Build the HTTP router with all endpoints.
pub fn build_router(proxy: Arc<SyncProxy>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(proxy))
}
