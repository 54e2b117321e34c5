//! Room summaries: the attributes lists are sorted and filtered on.

use serde::{Deserialize, Serialize};
use sync_types::{Room, RoomId};

/// Summary attributes of a room, as held by the metadata store.
///
/// Summaries are replaced wholesale on every update, so applying the same
/// summary twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// The room.
    pub room_id: RoomId,
    /// Display name, empty if the room has none.
    #[serde(default)]
    pub name: String,
    /// Timestamp of the latest event, milliseconds since the epoch.
    #[serde(default)]
    pub last_message_timestamp: i64,
    /// Encryption state; `None` when no encryption event has been seen.
    #[serde(default)]
    pub is_encrypted: Option<bool>,
    /// Joined member count.
    #[serde(default)]
    pub joined_count: u32,
    /// Invited member count.
    #[serde(default)]
    pub invited_count: u32,
    /// The latest raw event in the room.
    #[serde(default)]
    pub last_event: Option<serde_json::Value>,
}

impl RoomSummary {
    /// A summary with only an id and a name; everything else defaulted.
    pub fn new(room_id: RoomId, name: impl Into<String>) -> Self {
        Self {
            room_id,
            name: name.into(),
            last_message_timestamp: 0,
            is_encrypted: None,
            joined_count: 0,
            invited_count: 0,
            last_event: None,
        }
    }

    /// Builder-style setter for the activity timestamp.
    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.last_message_timestamp = ts;
        self
    }

    /// Builder-style setter for the encryption flag.
    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.is_encrypted = Some(encrypted);
        self
    }

    /// Render the client payload. The latest event is included only when
    /// the list asked for a timeline.
    pub fn to_room(&self, timeline_limit: u32) -> Room {
        let timeline = match (&self.last_event, timeline_limit) {
            (Some(event), limit) if limit > 0 => vec![event.clone()],
            _ => Vec::new(),
        };
        Room {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
            timeline,
            joined_count: self.joined_count,
            invited_count: self.invited_count,
        }
    }
}
