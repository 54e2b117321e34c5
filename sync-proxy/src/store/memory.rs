//! In-memory room store.

use super::{
    AppliedUpdate, EventData, MembershipChange, RoomStore, EVENT_ROOM_ENCRYPTION,
    EVENT_ROOM_MEMBER, EVENT_ROOM_NAME,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use sync_core::RoomSummary;
use sync_types::{Position, RoomId, UserId};

#[derive(Debug)]
struct RoomEntry {
    summary: RoomSummary,
    members: BTreeSet<UserId>,
    invited: BTreeSet<UserId>,
}

impl RoomEntry {
    fn new(summary: RoomSummary) -> Self {
        Self {
            summary,
            members: BTreeSet::new(),
            invited: BTreeSet::new(),
        }
    }

    fn refresh_counts(&mut self) {
        self.summary.joined_count = u32::try_from(self.members.len()).unwrap_or(u32::MAX);
        self.summary.invited_count = u32::try_from(self.invited.len()).unwrap_or(u32::MAX);
    }
}

/// Room store backed by concurrent hash maps.
///
/// Each room's read-modify-write runs under its `DashMap` shard lock, and
/// the position counter is bumped inside it.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<RoomId, RoomEntry>,
    user_rooms: DashMap<UserId, BTreeSet<RoomId>>,
    position: AtomicU64,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a room's summary. Membership is kept.
    pub fn insert_room(&self, summary: RoomSummary) {
        match self.rooms.get_mut(&summary.room_id) {
            Some(mut entry) => {
                entry.summary = summary;
                entry.refresh_counts();
            }
            None => {
                let mut entry = RoomEntry::new(summary);
                entry.refresh_counts();
                self.rooms.insert(entry.summary.room_id.clone(), entry);
            }
        }
    }

    /// Join a user to an existing room without an event.
    pub fn join(&self, user_id: &UserId, room_id: &RoomId) -> StoreResult<()> {
        let mut entry = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound {
                room_id: room_id.clone(),
            })?;
        entry.invited.remove(user_id);
        entry.members.insert(user_id.clone());
        entry.refresh_counts();
        self.user_rooms
            .entry(user_id.clone())
            .or_default()
            .insert(room_id.clone());
        Ok(())
    }

    /// Latest assigned position.
    pub fn position(&self) -> Position {
        Position::new(self.position.load(Ordering::SeqCst))
    }

    fn forget_membership(&self, user_id: &UserId, room_id: &RoomId) {
        if let Some(mut rooms) = self.user_rooms.get_mut(user_id) {
            rooms.remove(room_id);
        }
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn load_room(&self, room_id: &RoomId) -> Result<Option<RoomSummary>, StoreError> {
        Ok(self.rooms.get(room_id).map(|entry| entry.summary.clone()))
    }

    async fn load(&self, user_id: &UserId) -> Result<(Vec<RoomId>, Position), StoreError> {
        let rooms = self
            .user_rooms
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        Ok((rooms, self.position()))
    }

    async fn apply_event(&self, event: &EventData) -> Result<AppliedUpdate, StoreError> {
        let room_id = &event.room_id;
        let mut entry = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| RoomEntry::new(RoomSummary::new(room_id.clone(), "")));

        entry.summary.last_message_timestamp =
            entry.summary.last_message_timestamp.max(event.timestamp);
        entry.summary.last_event = Some(event.payload.clone());

        let mut membership = None;
        match event.event_type.as_str() {
            EVENT_ROOM_NAME => {
                if let Some(name) = event.content_str("name") {
                    entry.summary.name = name.to_string();
                }
            }
            EVENT_ROOM_ENCRYPTION => entry.summary.is_encrypted = Some(true),
            EVENT_ROOM_MEMBER => {
                if let (Some(user), Some(state)) =
                    (event.state_key(), event.content_str("membership"))
                {
                    let user_id = UserId::new(user);
                    match state {
                        "join" => {
                            entry.invited.remove(&user_id);
                            if entry.members.insert(user_id.clone()) {
                                self.user_rooms
                                    .entry(user_id.clone())
                                    .or_default()
                                    .insert(room_id.clone());
                                membership = Some(MembershipChange {
                                    user_id,
                                    joined: true,
                                });
                            }
                        }
                        "invite" => {
                            if !entry.members.contains(&user_id) {
                                entry.invited.insert(user_id);
                            }
                        }
                        "leave" | "ban" => {
                            entry.invited.remove(&user_id);
                            if entry.members.remove(&user_id) {
                                self.forget_membership(&user_id, room_id);
                                membership = Some(MembershipChange {
                                    user_id,
                                    joined: false,
                                });
                            }
                        }
                        other => {
                            tracing::debug!("Ignoring membership '{}' in {}", other, room_id);
                        }
                    }
                }
            }
            _ => {}
        }
        entry.refresh_counts();

        let position = Position::new(self.position.fetch_add(1, Ordering::SeqCst) + 1);

        let mut affected_users: Vec<UserId> = entry.members.iter().cloned().collect();
        if let Some(change) = membership.as_ref().filter(|change| !change.joined) {
            affected_users.push(change.user_id.clone());
        }

        Ok(AppliedUpdate {
            position,
            summary: entry.summary.clone(),
            affected_users,
            membership,
        })
    }
}
