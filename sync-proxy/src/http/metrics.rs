//! Prometheus metrics endpoint.

use crate::server::SyncProxy;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(proxy): Extension<Arc<SyncProxy>>) -> impl IntoResponse {
    let body = render(&proxy);
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(proxy: &SyncProxy) -> String {
    let m = proxy.metrics();

    // Gauges: current state
    let connections = proxy.total_connections();
    let users = proxy.total_users();
    let limiter_keys = proxy.rate_limits().user_keys_count();
    let pending = proxy.pending_updates();
    let position = proxy.position();

    // Counters: monotonic since startup
    let requests = m.requests_total.load(Ordering::Relaxed);
    let ops = m.ops_emitted.load(Ordering::Relaxed);
    let syncs = m.sync_ops_total.load(Ordering::Relaxed);
    let events = m.events_pushed.load(Ordering::Relaxed);
    let wakes = m.connection_wakes.load(Ordering::Relaxed);
    let created = m.connections_created.load(Ordering::Relaxed);
    let reaped = m.connections_reaped.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP sliding_sync_connections_active Number of live connection states
# TYPE sliding_sync_connections_active gauge
sliding_sync_connections_active {connections}

# HELP sliding_sync_users_active Number of users with a live connection
# TYPE sliding_sync_users_active gauge
sliding_sync_users_active {users}

# HELP sliding_sync_pending_updates Rooms with an update queued for a connection
# TYPE sliding_sync_pending_updates gauge
sliding_sync_pending_updates {pending}

# HELP sliding_sync_position Highest store position delivered to connections
# TYPE sliding_sync_position gauge
sliding_sync_position {position}

# HELP sliding_sync_rate_limiter_keys Users tracked by the rate limiter
# TYPE sliding_sync_rate_limiter_keys gauge
sliding_sync_rate_limiter_keys {limiter_keys}

# HELP sliding_sync_info Server information
# TYPE sliding_sync_info gauge
sliding_sync_info{{version="{version}"}} 1

# HELP sliding_sync_requests_total Total sync requests answered
# TYPE sliding_sync_requests_total counter
sliding_sync_requests_total {requests}

# HELP sliding_sync_ops_total Total list operations sent
# TYPE sliding_sync_ops_total counter
sliding_sync_ops_total {ops}

# HELP sliding_sync_sync_ops_total Total SYNC operations sent
# TYPE sliding_sync_sync_ops_total counter
sliding_sync_sync_ops_total {syncs}

# HELP sliding_sync_events_pushed_total Total events applied through ingestion
# TYPE sliding_sync_events_pushed_total counter
sliding_sync_events_pushed_total {events}

# HELP sliding_sync_connection_wakes_total Total room updates delivered to connections
# TYPE sliding_sync_connection_wakes_total counter
sliding_sync_connection_wakes_total {wakes}

# HELP sliding_sync_connections_created_total Total connection states created
# TYPE sliding_sync_connections_created_total counter
sliding_sync_connections_created_total {created}

# HELP sliding_sync_connections_reaped_total Total idle connection states dropped
# TYPE sliding_sync_connections_reaped_total counter
sliding_sync_connections_reaped_total {reaped}

# HELP sliding_sync_rate_limit_hits_total Total rate limit rejections
# TYPE sliding_sync_rate_limit_hits_total counter
sliding_sync_rate_limit_hits_total {rate_limits}

# HELP sliding_sync_errors_total Total failed requests and pushes
# TYPE sliding_sync_errors_total counter
sliding_sync_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
