//! Room metadata store.
//!
//! The proxy never owns room state; it reads summaries and membership through
//! [`RoomStore`] and hands every ingested event to it. Implementations must
//! serialize updates per room and assign positions inside that critical
//! section, so per-room order equals position order.

mod memory;

pub use memory::MemoryRoomStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::RoomSummary;
use sync_types::{Position, RoomId, UserId};

/// Event type that renames a room.
pub const EVENT_ROOM_NAME: &str = "m.room.name";
/// Event type that enables encryption.
pub const EVENT_ROOM_ENCRYPTION: &str = "m.room.encryption";
/// Event type that changes membership.
pub const EVENT_ROOM_MEMBER: &str = "m.room.member";

/// An event handed to the proxy by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Room the event belongs to.
    pub room_id: RoomId,
    /// Event type, e.g. `m.room.message`.
    pub event_type: String,
    /// Origin timestamp, milliseconds since the epoch.
    pub timestamp: i64,
    /// The full event JSON.
    pub payload: Value,
}

impl EventData {
    /// Create an event.
    pub fn new(
        room_id: RoomId,
        event_type: impl Into<String>,
        timestamp: i64,
        payload: Value,
    ) -> Self {
        Self {
            room_id,
            event_type: event_type.into(),
            timestamp,
            payload,
        }
    }

    /// The event's `state_key`, if it is a state event.
    pub fn state_key(&self) -> Option<&str> {
        self.payload.get("state_key").and_then(Value::as_str)
    }

    /// A string field of the event's `content`.
    pub fn content_str(&self, field: &str) -> Option<&str> {
        self.payload
            .get("content")
            .and_then(|content| content.get(field))
            .and_then(Value::as_str)
    }
}

/// A change to one user's membership of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    /// The user whose membership changed.
    pub user_id: UserId,
    /// True if the user joined, false if they left or were banned.
    pub joined: bool,
}

/// The result of applying one event.
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    /// Position assigned to the event.
    pub position: Position,
    /// Room summary after the event.
    pub summary: RoomSummary,
    /// Users whose room lists may change: joined members plus the subject
    /// of a membership change.
    pub affected_users: Vec<UserId>,
    /// Membership change carried by the event, if any.
    pub membership: Option<MembershipChange>,
}

/// Trait for room metadata backends.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Current summary of a room, or `None` if the room is unknown.
    async fn load_room(&self, room_id: &RoomId) -> Result<Option<RoomSummary>, StoreError>;

    /// Rooms the user is joined to, and the latest position at the time of
    /// reading.
    async fn load(&self, user_id: &UserId) -> Result<(Vec<RoomId>, Position), StoreError>;

    /// Apply an event atomically for its room and return the outcome.
    async fn apply_event(&self, event: &EventData) -> Result<AppliedUpdate, StoreError>;
}
