//! `/health`: liveness plus the proxy's sync backlog.

use crate::server::SyncProxy;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use sync_types::Position;

/// Body of a `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok`, or `backlogged` when queued room updates outnumber live
    /// connections by [`BACKLOG_PER_CONNECTION`].
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Highest store position delivered to connections.
    pub position: Position,
    /// Live connection states.
    pub connections: usize,
    /// Queued room updates across all connections.
    pub pending_updates: usize,
    /// Seconds since the proxy started.
    pub uptime_secs: u64,
}

/// Average queued rooms per connection above which the proxy reports itself
/// as backlogged.
pub const BACKLOG_PER_CONNECTION: usize = 256;

impl HealthStatus {
    /// Snapshot the proxy.
    pub fn of(proxy: &SyncProxy) -> Self {
        let connections = proxy.total_connections();
        let pending_updates = proxy.pending_updates();
        let status = if pending_updates > connections.max(1) * BACKLOG_PER_CONNECTION {
            "backlogged"
        } else {
            "ok"
        };
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            position: proxy.position(),
            connections,
            pending_updates,
            uptime_secs: proxy.uptime().as_secs(),
        }
    }
}

pub(super) async fn health_handler(
    Extension(proxy): Extension<Arc<SyncProxy>>,
) -> Json<HealthStatus> {
    Json(HealthStatus::of(&proxy))
}
