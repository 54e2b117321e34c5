//! Background cleanup task for idle connections.
//!
//! Runs periodically to drop connection states nobody has polled within
//! the configured TTL, and to evict recharged rate-limiter entries.

use crate::config::CleanupConfig;
use crate::server::SyncProxy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    proxy: Arc<SyncProxy>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        let ttl = config.connection_ttl();
        tracing::info!(
            "Cleanup task started (interval: {}s, connection ttl: {}s)",
            interval_secs,
            ttl.as_secs()
        );

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_cleanup(&proxy, ttl);
        }
    })
}

/// Run one cleanup pass. Returns the number of connections dropped.
pub fn run_cleanup(proxy: &SyncProxy, ttl: Duration) -> usize {
    let reaped = proxy.reap_idle(ttl);
    proxy.rate_limits().shrink();

    if reaped > 0 {
        tracing::info!(
            "Cleanup: dropped {} idle connections ({} remain)",
            reaped,
            proxy.total_connections()
        );
    } else {
        tracing::debug!("Cleanup: no idle connections");
    }
    reaped
}
