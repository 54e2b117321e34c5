//! Main SyncProxy coordination.
//!
//! SyncProxy owns the room store, the live connection states and the rate
//! limiters. Requests are routed to their [`ConnState`]; ingested events are
//! applied to the store and fanned out to every affected connection.

use crate::config::Config;
use crate::conn::{ConnState, RoomUpdate};
use crate::error::{ProxyError, Result};
use crate::limits::{RateLimitError, RateLimits};
use crate::store::{EventData, RoomStore};
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_types::{ConnId, Position, Request, Response, ResponseOp, RoomId, UserId};

/// Operational metrics for monitoring proxy activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    /// Total sync requests answered successfully.
    pub requests_total: AtomicU64,
    /// Total list operations sent to clients.
    pub ops_emitted: AtomicU64,
    /// Total SYNC operations sent (first loads, redefinitions, fallbacks).
    pub sync_ops_total: AtomicU64,
    /// Total events pushed through ingestion.
    pub events_pushed: AtomicU64,
    /// Total room updates delivered to connections.
    pub connection_wakes: AtomicU64,
    /// Total connection states created.
    pub connections_created: AtomicU64,
    /// Total idle connection states dropped.
    pub connections_reaped: AtomicU64,
    /// Total rate limit rejections (user + global + connection cap).
    pub rate_limit_hits: AtomicU64,
    /// Total failed requests and pushes.
    pub errors_total: AtomicU64,
}

type ConnKey = (UserId, ConnId);

/// Main proxy server.
pub struct SyncProxy {
    config: Config,
    store: Arc<dyn RoomStore>,
    /// Rate limiters for sync requests.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: ProxyMetrics,
    /// Live connection states.
    connections: DashMap<ConnKey, Arc<ConnState>>,
    /// Live connection ids per user, for fan-out.
    user_connections: DashMap<UserId, HashSet<ConnId>>,
    /// Serializes apply-then-fan-out per room.
    room_locks: DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>,
    /// Highest store position fanned out so far.
    position: AtomicU64,
    started: Instant,
}

impl std::fmt::Debug for SyncProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProxy")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections_count", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl SyncProxy {
    /// Create a new SyncProxy with the given config and store.
    pub fn new(config: Config, store: Arc<dyn RoomStore>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            store,
            rate_limits,
            metrics: ProxyMetrics::default(),
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            room_locks: DashMap::new(),
            position: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Get the proxy configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the room store.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    /// Answer a sync request, long-polling until `cancel` resolves.
    ///
    /// # Errors
    ///
    /// Rate limiting, the connection cap, request validation and store
    /// failures. None of them modify connection baselines.
    pub async fn handle_incoming_request<F>(
        &self,
        user_id: &UserId,
        conn_id: &ConnId,
        request: &Request,
        cancel: F,
    ) -> Result<Response>
    where
        F: Future<Output = ()>,
    {
        self.check_rate(user_id)?;
        let conn = self.connection(user_id, conn_id)?;

        let response = match conn.handle_incoming_request(request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                if e.is_transient() {
                    tracing::warn!("{}/{}: request failed: {}", user_id, conn_id, e);
                } else {
                    tracing::debug!("{}/{}: rejected request: {}", user_id, conn_id, e);
                }
                return Err(e);
            }
        };

        let syncs = response
            .ops
            .iter()
            .filter(|op| matches!(op, ResponseOp::Sync { .. }))
            .count();
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .ops_emitted
            .fetch_add(response.ops.len() as u64, Ordering::Relaxed);
        self.metrics
            .sync_ops_total
            .fetch_add(syncs as u64, Ordering::Relaxed);
        Ok(response)
    }

    /// Answer a sync request with the configured long-poll timeout.
    pub async fn handle_request(
        &self,
        user_id: &UserId,
        conn_id: &ConnId,
        request: &Request,
    ) -> Result<Response> {
        let timeout = self.config.sync.long_poll_timeout();
        self.handle_incoming_request(user_id, conn_id, request, tokio::time::sleep(timeout))
            .await
    }

    /// Apply an ingested event and wake every connection it may affect.
    ///
    /// Events for one room are applied and delivered in call order; events
    /// for different rooms proceed concurrently.
    ///
    /// # Errors
    ///
    /// Store failures. Nothing is delivered when the store rejects the event.
    pub async fn push_new_event(&self, event: EventData) -> Result<Position> {
        let lock = self
            .room_locks
            .entry(event.room_id.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let applied = self.store.apply_event(&event).await.map_err(|e| {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to apply {} in {}: {}", event.event_type, event.room_id, e);
            ProxyError::from(e)
        })?;
        self.metrics.events_pushed.fetch_add(1, Ordering::Relaxed);
        self.position
            .fetch_max(applied.position.value(), Ordering::Relaxed);

        let update = RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        };
        let mut delivered = 0u64;
        for user_id in &applied.affected_users {
            for conn in self.user_states(user_id) {
                conn.on_update(update.clone());
                delivered += 1;
            }
        }
        self.metrics
            .connection_wakes
            .fetch_add(delivered, Ordering::Relaxed);

        tracing::debug!(
            "{} in {} at {}: delivered to {} connections of {} users",
            event.event_type,
            event.room_id,
            applied.position,
            delivered,
            applied.affected_users.len()
        );
        Ok(applied.position)
    }

    /// Drop connection states idle for longer than `ttl`. Connections with a
    /// request in flight are kept.
    ///
    /// Returns the number of connections dropped.
    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let candidates: Vec<ConnKey> = self
            .connections
            .iter()
            .filter(|entry| reapable(entry.value(), ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0usize;
        for key in candidates {
            // Lock order: the user's index entry, then the connection map.
            let mut ids = self.user_connections.entry(key.0.clone()).or_default();
            let removed = self
                .connections
                .remove_if(&key, |_, conn| reapable(conn, ttl))
                .is_some();
            if removed {
                ids.remove(&key.1);
                reaped += 1;
                tracing::info!("Dropped idle connection {}/{}", key.0, key.1);
            }
        }
        self.user_connections.retain(|_, ids| !ids.is_empty());
        self.room_locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        self.metrics
            .connections_reaped
            .fetch_add(reaped as u64, Ordering::Relaxed);
        reaped
    }

    /// Get total live connection states.
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Get total users with at least one live connection.
    pub fn total_users(&self) -> usize {
        self.user_connections.len()
    }

    /// Highest store position delivered to connections.
    pub fn position(&self) -> Position {
        Position::new(self.position.load(Ordering::Relaxed))
    }

    /// Rooms with an update waiting for their connection's next request,
    /// summed over all connections.
    pub fn pending_updates(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().pending_count())
            .sum()
    }

    /// Time since the proxy was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn check_rate(&self, user_id: &UserId) -> Result<()> {
        let checked = self
            .rate_limits
            .check_global()
            .and_then(|()| self.rate_limits.check_user(user_id));
        checked.map_err(|e: RateLimitError| {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rate limited {}: {}", user_id, e);
            ProxyError::RateLimited {
                reason: e.to_string(),
            }
        })
    }

    /// Get or create the state for a connection. New states are registered
    /// for fan-out before their first load, so no update is missed.
    ///
    /// Runs under the user's index entry, the same lock `reap_idle` takes,
    /// so a connection is never in the map without being in the index.
    fn connection(&self, user_id: &UserId, conn_id: &ConnId) -> Result<Arc<ConnState>> {
        let key = (user_id.clone(), conn_id.clone());
        let mut ids = self.user_connections.entry(user_id.clone()).or_default();

        let existing = self.connections.get(&key).map(|conn| conn.value().clone());
        if let Some(conn) = existing {
            conn.touch();
            return Ok(conn);
        }

        let limit = self.config.limits.max_connections;
        if self.connections.len() >= limit {
            drop(ids);
            self.user_connections
                .remove_if(user_id, |_, ids| ids.is_empty());
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Connection cap reached, rejecting {}/{}", user_id, conn_id);
            return Err(ProxyError::TooManyConnections { limit });
        }

        let conn = Arc::new(ConnState::new(
            user_id.clone(),
            conn_id.clone(),
            self.store.clone(),
            self.config.sync.clone(),
        ));
        self.connections.insert(key, conn.clone());
        ids.insert(conn_id.clone());
        self.metrics
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!("New connection {}/{}", user_id, conn_id);
        Ok(conn)
    }

    fn user_states(&self, user_id: &UserId) -> Vec<Arc<ConnState>> {
        let conn_ids: Vec<ConnId> = self
            .user_connections
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        conn_ids
            .into_iter()
            .filter_map(|conn_id| {
                self.connections
                    .get(&(user_id.clone(), conn_id))
                    .map(|conn| conn.value().clone())
            })
            .collect()
    }
}

/// Idle past `ttl` with no request in flight.
fn reapable(conn: &ConnState, ttl: Duration) -> bool {
    !conn.is_busy() && conn.is_idle(ttl)
}
