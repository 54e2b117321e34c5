//! Per-connection sync state.
//!
//! A [`ConnState`] owns the baselines for one client connection: the rooms
//! the user is joined to, a private copy of their summaries, and one
//! [`ListState`] per requested list. Room updates are queued by the ingestion
//! path and only folded in while a request is being answered, so every
//! computation sees a coherent snapshot. The queue keeps the newest update
//! per room, so a client that stops polling holds at most one summary for
//! each room it can see.
//!
//! ## Request flow
//!
//! ```text
//! validate ──► load (first request) ──► drain queue ──► diff lists ──► commit
//!                                           ▲                │
//!                                           └── wait ◄───────┘ (no ops)
//! ```

use crate::config::SyncConfig;
use crate::error::{Result, StoreError};
use crate::store::{MembershipChange, RoomStore};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use sync_core::{DiffComputer, ListDefinition, ListState, RoomChange, RoomSummary};
use sync_types::{ConnId, Position, Request, RequestError, Response, RoomId, UserId};
use tokio::sync::Notify;

/// A room change delivered to a connection.
#[derive(Debug, Clone)]
pub struct RoomUpdate {
    /// Position of the event that produced the change.
    pub position: Position,
    /// Room summary after the event.
    pub summary: RoomSummary,
    /// Membership change carried by the event, if any.
    pub membership: Option<MembershipChange>,
}

#[derive(Debug, Default)]
struct ConnInner {
    loaded: bool,
    position: Position,
    joined: HashSet<RoomId>,
    rooms: HashMap<RoomId, RoomSummary>,
    lists: Vec<ListState>,
}

/// State for one (user, connection) pair.
pub struct ConnState {
    user_id: UserId,
    conn_id: ConnId,
    store: Arc<dyn RoomStore>,
    settings: SyncConfig,
    diff: DiffComputer,
    inner: tokio::sync::Mutex<ConnInner>,
    /// Newest undelivered update per room.
    pending: Mutex<HashMap<RoomId, RoomUpdate>>,
    notify: Notify,
    created: Instant,
    last_active_ms: AtomicU64,
}

impl std::fmt::Debug for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnState")
            .field("user_id", &self.user_id)
            .field("conn_id", &self.conn_id)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ConnState {
    /// Create an empty connection. Nothing is loaded until the first request.
    pub fn new(
        user_id: UserId,
        conn_id: ConnId,
        store: Arc<dyn RoomStore>,
        settings: SyncConfig,
    ) -> Self {
        let diff = DiffComputer::new(settings.max_incremental_deltas);
        Self {
            user_id,
            conn_id,
            store,
            settings,
            diff,
            inner: tokio::sync::Mutex::new(ConnInner::default()),
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        }
    }

    /// The user this connection belongs to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The connection identifier.
    pub fn conn_id(&self) -> &ConnId {
        &self.conn_id
    }

    /// Answer a sync request.
    ///
    /// Waits for room updates when nothing has changed since the last
    /// response, until `cancel` resolves. A cancelled wait returns a valid,
    /// possibly empty, response. Concurrent calls on one connection run one
    /// after another: a waiting call keeps the connection until it returns,
    /// so a follow-up request with new ranges is answered only after the
    /// earlier call is woken by an update or cancelled.
    ///
    /// # Errors
    ///
    /// Validation and store failures are returned before any baseline is
    /// modified.
    pub async fn handle_incoming_request<F>(&self, request: &Request, cancel: F) -> Result<Response>
    where
        F: Future<Output = ()>,
    {
        self.touch();
        let definitions = self.validate(request)?;

        let mut inner = self.inner.lock().await;
        let first = !inner.loaded;
        if first {
            self.load(&mut inner).await?;
        }
        let forced = first
            || inner.lists.len() != definitions.len()
            || inner
                .lists
                .iter()
                .zip(&definitions)
                .any(|(state, definition)| state.definition() != definition);

        tokio::pin!(cancel);
        let mut cancelled = false;
        let response = loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the queue so an update
            // pushed in between still wakes us.
            notified.as_mut().enable();

            let updates = self.drain();
            if updates.is_empty() && !forced && !cancelled {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = &mut cancel => cancelled = true,
                }
                continue;
            }

            let response = self.compute(&mut inner, &definitions, updates);
            if forced || cancelled || !response.ops.is_empty() {
                break response;
            }
        };
        drop(inner);
        self.touch();

        tracing::debug!(
            "{}/{}: {} ops across {} lists at {}",
            self.user_id,
            self.conn_id,
            response.ops.len(),
            response.counts.len(),
            response.pos
        );
        Ok(response)
    }

    /// Queue a room update and wake a waiting request.
    ///
    /// A newer update for a room replaces the queued one. A membership change
    /// of this connection's user is carried over until a later one replaces
    /// it. Updates for rooms the user neither belongs to nor is joining or
    /// leaving are dropped when drained.
    pub fn on_update(&self, mut update: RoomUpdate) {
        if update
            .membership
            .as_ref()
            .is_some_and(|change| change.user_id != self.user_id)
        {
            update.membership = None;
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.entry(update.summary.room_id.clone()) {
            Entry::Occupied(mut slot) => {
                let queued = slot.get_mut();
                if update.membership.is_none() {
                    update.membership = queued.membership.take();
                }
                update.position = update.position.max(queued.position);
                *queued = update;
            }
            Entry::Vacant(slot) => {
                slot.insert(update);
            }
        }
        drop(pending);
        self.notify.notify_waiters();
    }

    /// Number of rooms with a queued update.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if no request has started or finished for longer than `ttl`.
    pub fn is_idle(&self, ttl: Duration) -> bool {
        let now = self.elapsed_ms();
        let last = self.last_active_ms.load(Ordering::Relaxed);
        now.saturating_sub(last) > u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// True while a request is being answered.
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Mark the connection as active now.
    pub(crate) fn touch(&self) {
        self.last_active_ms
            .store(self.elapsed_ms(), Ordering::Relaxed);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn drain(&self) -> Vec<RoomUpdate> {
        let mut updates: Vec<RoomUpdate> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, update)| update)
            .collect();
        updates.sort_by_key(|update| update.position);
        updates
    }

    fn validate(&self, request: &Request) -> Result<Vec<ListDefinition>> {
        if request.lists.len() > self.settings.max_lists {
            return Err(RequestError::TooManyLists {
                count: request.lists.len(),
                limit: self.settings.max_lists,
            }
            .into());
        }
        let definitions = request
            .lists
            .iter()
            .enumerate()
            .map(|(index, list)| {
                ListDefinition::from_request(index, list, self.settings.max_ranges_per_list)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(definitions)
    }

    async fn load(&self, inner: &mut ConnInner) -> Result<()> {
        let (room_ids, position) = self.store.load(&self.user_id).await.map_err(|e| {
            tracing::warn!("{}: failed to load room set: {}", self.user_id, e);
            e
        })?;

        let mut rooms = HashMap::with_capacity(room_ids.len());
        for room_id in &room_ids {
            let summary = self.store.load_room(room_id).await?.ok_or_else(|| {
                StoreError::Inconsistent(format!(
                    "{} is joined to {} but the room has no summary",
                    self.user_id, room_id
                ))
            })?;
            rooms.insert(room_id.clone(), summary);
        }

        tracing::info!(
            "{}/{}: loaded {} rooms at {}",
            self.user_id,
            self.conn_id,
            rooms.len(),
            position
        );
        inner.joined = room_ids.into_iter().collect();
        inner.rooms = rooms;
        inner.position = position;
        inner.loaded = true;
        Ok(())
    }

    /// Fold updates into the snapshot, diff every list and commit the new
    /// baselines.
    fn compute(
        &self,
        inner: &mut ConnInner,
        definitions: &[ListDefinition],
        updates: Vec<RoomUpdate>,
    ) -> Response {
        let mut changed: Vec<(RoomSummary, bool)> = Vec::with_capacity(updates.len());
        for update in updates {
            let room_id = update.summary.room_id.clone();
            match update.membership {
                Some(MembershipChange { user_id, joined }) if user_id == self.user_id => {
                    if joined {
                        inner.joined.insert(room_id.clone());
                    } else {
                        inner.joined.remove(&room_id);
                    }
                }
                _ => {}
            }
            let present = inner.joined.contains(&room_id);
            if present {
                inner.rooms.insert(room_id, update.summary.clone());
            } else if inner.rooms.remove(&room_id).is_none() {
                continue;
            }
            inner.position = inner.position.max(update.position);
            changed.push((update.summary, present));
        }
        let changes: Vec<RoomChange<'_>> = changed
            .iter()
            .map(|(summary, present)| RoomChange {
                summary,
                present: *present,
            })
            .collect();

        let mut baselines: Vec<Option<ListState>> =
            std::mem::take(&mut inner.lists).into_iter().map(Some).collect();
        let mut ops = Vec::new();
        let mut counts = Vec::with_capacity(definitions.len());
        let mut lists = Vec::with_capacity(definitions.len());
        for (index, definition) in definitions.iter().enumerate() {
            let baseline = baselines.get_mut(index).and_then(Option::take);
            let (state, diff) = self.diff.diff(
                index,
                baseline,
                definition.clone(),
                &changes,
                inner.rooms.values(),
            );
            if diff.full_sync {
                tracing::debug!(
                    "{}/{}: list {} answered with SYNC",
                    self.user_id,
                    self.conn_id,
                    index
                );
            }
            ops.extend(diff.ops);
            counts.push(diff.count);
            lists.push(state);
        }
        inner.lists = lists;

        Response {
            ops,
            counts,
            pos: inner.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::store::{EventData, MemoryRoomStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::future::{pending, ready};
    use sync_types::{RequestFilters, RequestList, ResponseOp, SliceRanges};

    fn alice() -> UserId {
        UserId::new("@alice:localhost")
    }

    fn summary(id: &str, name: &str, ts: i64) -> RoomSummary {
        RoomSummary::new(RoomId::new(id), name).with_timestamp(ts)
    }

    fn abc_store() -> Arc<MemoryRoomStore> {
        let store = MemoryRoomStore::new();
        for room in [
            summary("!a", "Room A", 1000),
            summary("!b", "Room B", 9000),
            summary("!c", "Room C", 5000),
        ] {
            let id = room.room_id.clone();
            store.insert_room(room);
            store.join(&alice(), &id).unwrap();
        }
        Arc::new(store)
    }

    fn conn(store: Arc<dyn RoomStore>) -> ConnState {
        ConnState::new(alice(), ConnId::new("s1", "d1"), store, SyncConfig::default())
    }

    fn list(ranges: Vec<[u64; 2]>, filters: Option<RequestFilters>) -> RequestList {
        RequestList {
            sort: vec!["by_recency".into()],
            rooms: SliceRanges::new(ranges),
            timeline_limit: 0,
            filters,
        }
    }

    fn one_list() -> Request {
        Request {
            lists: vec![list(vec![[0, 9]], None)],
        }
    }

    fn describe(response: &Response) -> Vec<String> {
        response
            .ops
            .iter()
            .map(|op| match op {
                ResponseOp::Sync { list, rooms, .. } => format!(
                    "{} SYNC {}",
                    list,
                    rooms
                        .iter()
                        .map(|r| r.room_id.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
                ResponseOp::Insert {
                    list, index, room, ..
                } => format!("{} INSERT {} {}", list, index, room.room_id),
                ResponseOp::Delete { list, index } => format!("{} DELETE {}", list, index),
                ResponseOp::Update {
                    list, index, room, ..
                } => format!("{} UPDATE {} {}", list, index, room.room_id),
            })
            .collect()
    }

    async fn push(store: &MemoryRoomStore, conn: &ConnState, room: &str, ts: i64) {
        let applied = store
            .apply_event(&EventData::new(
                RoomId::new(room),
                "m.room.message",
                ts,
                json!({"type": "m.room.message", "content": {"body": "bump"}}),
            ))
            .await
            .unwrap();
        conn.on_update(RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        });
    }

    #[tokio::test]
    async fn initial_sync_then_move_then_update() {
        let store = abc_store();
        let conn = conn(store.clone());

        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 SYNC !b,!c,!a"]);
        assert_eq!(response.counts, vec![3]);
        match &response.ops[0] {
            ResponseOp::Sync { range, rooms, .. } => {
                assert_eq!(*range, [0, 9]);
                assert_eq!(rooms[0].name, "Room B");
            }
            other => panic!("expected SYNC, got {:?}", other),
        }

        push(&store, &conn, "!a", 10_000).await;
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 DELETE 2", "0 INSERT 0 !a"]);
        assert_eq!(response.counts, vec![3]);

        push(&store, &conn, "!a", 11_000).await;
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 UPDATE 0 !a"]);
        assert_eq!(response.pos, store.position());
    }

    #[tokio::test]
    async fn complementary_filters_partition_rooms() {
        let store = MemoryRoomStore::new();
        for i in 0..20 {
            let id = format!("!r{:02}", i);
            let room = summary(&id, &id, 1000 + i).with_encryption(i % 2 == 0);
            store.insert_room(room);
            store.join(&alice(), &RoomId::new(id)).unwrap();
        }
        let conn = conn(Arc::new(store));

        let request = Request {
            lists: vec![
                list(
                    vec![[0, 2]],
                    Some(RequestFilters {
                        is_encrypted: Some(true),
                        room_name_like: None,
                    }),
                ),
                list(
                    vec![[0, 2]],
                    Some(RequestFilters {
                        is_encrypted: Some(false),
                        room_name_like: None,
                    }),
                ),
            ],
        };
        let response = conn.handle_incoming_request(&request, pending()).await.unwrap();
        assert_eq!(response.counts, vec![10, 10]);
        assert_eq!(
            describe(&response),
            vec!["0 SYNC !r18,!r16,!r14", "1 SYNC !r19,!r17,!r15"]
        );
    }

    #[tokio::test]
    async fn unchanged_request_waits_until_cancelled() {
        let store = abc_store();
        let conn = conn(store);
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let response = conn
            .handle_incoming_request(&one_list(), ready(()))
            .await
            .unwrap();
        assert!(response.ops.is_empty());
        assert_eq!(response.counts, vec![3]);
    }

    #[tokio::test]
    async fn repeated_request_is_idempotent() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        // New content at the same rank is an UPDATE.
        push(&store, &conn, "!b", 9000).await;
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 UPDATE 0 !b"]);

        // Replaying the same summary changes nothing.
        let replay = RoomUpdate {
            position: store.position(),
            summary: store.load_room(&RoomId::new("!b")).await.unwrap().unwrap(),
            membership: None,
        };
        conn.on_update(replay.clone());
        conn.on_update(replay);
        let response = conn
            .handle_incoming_request(&one_list(), ready(()))
            .await
            .unwrap();
        assert!(response.ops.is_empty());
        assert_eq!(response.counts, vec![3]);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn long_poll_wakes_on_update() {
        let store = abc_store();
        let conn = Arc::new(conn(store.clone()));
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.handle_incoming_request(
                    &one_list(),
                    tokio::time::sleep(Duration::from_secs(10)),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        push(&store, &conn, "!c", 20_000).await;

        let response = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("request should wake")
            .unwrap()
            .unwrap();
        assert_eq!(describe(&response), vec!["0 DELETE 1", "0 INSERT 0 !c"]);
    }

    #[tokio::test]
    async fn validation_failure_leaves_baseline() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let bad = Request {
            lists: vec![list(vec![[5, 1]], None)],
        };
        let err = conn
            .handle_incoming_request(&bad, pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Request(RequestError::InvalidRange { .. })
        ));

        // Baseline intact: the next change is incremental.
        push(&store, &conn, "!a", 10_000).await;
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 DELETE 2", "0 INSERT 0 !a"]);
    }

    #[tokio::test]
    async fn too_many_lists_is_rejected() {
        let store = abc_store();
        let settings = SyncConfig {
            max_lists: 1,
            ..SyncConfig::default()
        };
        let conn = ConnState::new(alice(), ConnId::new("s1", "d1"), store, settings);
        let request = Request {
            lists: vec![list(vec![[0, 1]], None), list(vec![[0, 1]], None)],
        };
        let err = conn
            .handle_incoming_request(&request, pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Request(RequestError::TooManyLists { count: 2, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn redefined_list_is_resynced() {
        let store = abc_store();
        let conn = conn(store);
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let narrowed = Request {
            lists: vec![list(vec![[0, 0]], None)],
        };
        let response = conn
            .handle_incoming_request(&narrowed, pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 SYNC !b"]);

        // Dropping the list returns immediately with nothing.
        let response = conn
            .handle_incoming_request(&Request::default(), pending())
            .await
            .unwrap();
        assert!(response.ops.is_empty());
        assert!(response.counts.is_empty());
    }

    #[tokio::test]
    async fn join_and_leave_change_room_set() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let applied = store
            .apply_event(&EventData::new(
                RoomId::new("!d"),
                "m.room.member",
                20_000,
                json!({
                    "type": "m.room.member",
                    "state_key": "@alice:localhost",
                    "content": {"membership": "join"}
                }),
            ))
            .await
            .unwrap();
        conn.on_update(RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        });
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 INSERT 0 !d"]);
        assert_eq!(response.counts, vec![4]);

        let applied = store
            .apply_event(&EventData::new(
                RoomId::new("!b"),
                "m.room.member",
                20_001,
                json!({
                    "type": "m.room.member",
                    "state_key": "@alice:localhost",
                    "content": {"membership": "leave"}
                }),
            ))
            .await
            .unwrap();
        conn.on_update(RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        });
        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 DELETE 1"]);
        assert_eq!(response.counts, vec![3]);
    }

    #[tokio::test]
    async fn updates_for_foreign_rooms_are_ignored() {
        let store = abc_store();
        let conn = conn(store);
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        conn.on_update(RoomUpdate {
            position: Position::new(99),
            summary: summary("!elsewhere", "X", 50_000),
            membership: None,
        });
        let response = conn
            .handle_incoming_request(&one_list(), ready(()))
            .await
            .unwrap();
        assert!(response.ops.is_empty());
        assert_eq!(response.counts, vec![3]);
    }

    #[tokio::test]
    async fn concurrent_requests_run_one_after_another() {
        let store = abc_store();
        let conn = Arc::new(conn(store.clone()));
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let polling = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.handle_incoming_request(
                    &one_list(),
                    tokio::time::sleep(Duration::from_secs(10)),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(conn.is_busy());

        // A second list scrolls in while the first request is still waiting.
        let scrolled = Request {
            lists: vec![list(vec![[0, 9]], None), list(vec![[0, 1]], None)],
        };
        let queued = {
            let conn = conn.clone();
            let request = scrolled.clone();
            tokio::spawn(async move { conn.handle_incoming_request(&request, pending()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queued.is_finished());

        push(&store, &conn, "!a", 10_000).await;
        let polled = tokio::time::timeout(Duration::from_secs(5), polling)
            .await
            .expect("waiting request should wake")
            .unwrap()
            .unwrap();
        assert_eq!(describe(&polled), vec!["0 DELETE 2", "0 INSERT 0 !a"]);

        let resynced = tokio::time::timeout(Duration::from_secs(5), queued)
            .await
            .expect("queued request should run")
            .unwrap()
            .unwrap();
        assert_eq!(describe(&resynced), vec!["1 SYNC !a,!b"]);
        assert_eq!(resynced.counts, vec![3, 3]);

        push(&store, &conn, "!c", 20_000).await;
        let response = conn
            .handle_incoming_request(&scrolled, pending())
            .await
            .unwrap();
        assert_eq!(
            describe(&response),
            vec!["0 DELETE 2", "0 INSERT 0 !c", "1 DELETE 1", "1 INSERT 0 !c"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn update_racing_the_wait_still_wakes() {
        let store = abc_store();
        let conn = Arc::new(conn(store.clone()));
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        for i in 0..200i64 {
            let waiter = {
                let conn = conn.clone();
                tokio::spawn(async move { conn.handle_incoming_request(&one_list(), pending()).await })
            };
            push(&store, &conn, "!a", 10_000 + i).await;
            let response = tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .unwrap_or_else(|_| panic!("update {} never woke the request", i))
                .unwrap()
                .unwrap();
            assert!(!response.ops.is_empty(), "iteration {}", i);
        }
    }

    #[tokio::test]
    async fn pending_updates_keep_newest_per_room() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        for i in 0..100 {
            push(&store, &conn, "!a", 10_000 + i).await;
        }
        assert_eq!(conn.pending_count(), 1);

        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 DELETE 2", "0 INSERT 0 !a"]);
        assert_eq!(response.pos, store.position());
        match &response.ops[1] {
            ResponseOp::Insert { room, .. } => assert_eq!(room.room_id, RoomId::new("!a")),
            other => panic!("expected INSERT, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn queued_join_survives_a_later_update() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let applied = store
            .apply_event(&EventData::new(
                RoomId::new("!d"),
                "m.room.member",
                20_000,
                json!({
                    "type": "m.room.member",
                    "state_key": "@alice:localhost",
                    "content": {"membership": "join"}
                }),
            ))
            .await
            .unwrap();
        conn.on_update(RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        });
        push(&store, &conn, "!d", 20_001).await;
        assert_eq!(conn.pending_count(), 1);

        let response = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();
        assert_eq!(describe(&response), vec!["0 INSERT 0 !d"]);
        assert_eq!(response.counts, vec![4]);
    }

    #[tokio::test]
    async fn other_users_membership_is_not_applied() {
        let store = abc_store();
        let conn = conn(store.clone());
        conn.handle_incoming_request(&one_list(), pending())
            .await
            .unwrap();

        let applied = store
            .apply_event(&EventData::new(
                RoomId::new("!e"),
                "m.room.member",
                30_000,
                json!({
                    "type": "m.room.member",
                    "state_key": "@bob:localhost",
                    "content": {"membership": "join"}
                }),
            ))
            .await
            .unwrap();
        conn.on_update(RoomUpdate {
            position: applied.position,
            summary: applied.summary,
            membership: applied.membership,
        });

        let response = conn
            .handle_incoming_request(&one_list(), ready(()))
            .await
            .unwrap();
        assert!(response.ops.is_empty());
        assert_eq!(response.counts, vec![3]);
    }

    struct UnavailableStore;

    #[async_trait]
    impl RoomStore for UnavailableStore {
        async fn load_room(&self, _: &RoomId) -> std::result::Result<Option<RoomSummary>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn load(&self, _: &UserId) -> std::result::Result<(Vec<RoomId>, Position), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn apply_event(
            &self,
            _: &EventData,
        ) -> std::result::Result<crate::store::AppliedUpdate, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let conn = conn(Arc::new(UnavailableStore));
        let err = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Store(StoreError::Unavailable(_))));
        assert!(err.is_transient());
    }

    struct MissingSummaryStore;

    #[async_trait]
    impl RoomStore for MissingSummaryStore {
        async fn load_room(&self, _: &RoomId) -> std::result::Result<Option<RoomSummary>, StoreError> {
            Ok(None)
        }

        async fn load(&self, _: &UserId) -> std::result::Result<(Vec<RoomId>, Position), StoreError> {
            Ok((vec![RoomId::new("!ghost")], Position::new(1)))
        }

        async fn apply_event(
            &self,
            _: &EventData,
        ) -> std::result::Result<crate::store::AppliedUpdate, StoreError> {
            Err(StoreError::Unavailable("read only".into()))
        }
    }

    #[tokio::test]
    async fn missing_summary_is_inconsistent() {
        let conn = conn(Arc::new(MissingSummaryStore));
        let err = conn
            .handle_incoming_request(&one_list(), pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Store(StoreError::Inconsistent(_))));
    }

    #[test]
    fn fresh_connection_is_not_idle() {
        let conn = conn(abc_store());
        assert!(!conn.is_idle(Duration::from_secs(60)));
        assert!(!conn.is_busy());
    }
}
