//! Request and response bodies for the sliding sync endpoint.
//!
//! Both are JSON. A request carries one [`RequestList`] per view; a response
//! carries one count per list and a flat sequence of [`ResponseOp`]s, each
//! tagged with the list it belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Position, RequestError, RoomId, SliceRanges};

/// Wire name of the recency sort key.
pub const SORT_BY_RECENCY: &str = "by_recency";
/// Wire name of the name sort key.
pub const SORT_BY_NAME: &str = "by_name";

/// A sync request from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// One entry per list, identified by position.
    #[serde(default)]
    pub lists: Vec<RequestList>,
}

impl Request {
    /// Parse a request body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(bytes).map_err(RequestError::Json)
    }
}

/// Definition of one sorted, filtered, windowed view over the user's rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestList {
    /// Sort keys, most significant first. Empty means `by_recency`.
    #[serde(default)]
    pub sort: Vec<String>,
    /// Index ranges the client wants to see.
    #[serde(default)]
    pub rooms: SliceRanges,
    /// Number of timeline events to include per room.
    #[serde(default)]
    pub timeline_limit: u32,
    /// Optional filters restricting which rooms are in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RequestFilters>,
}

/// Filters applied to a list. All present filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilters {
    /// Only encrypted (`true`) or only unencrypted (`false`) rooms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_encrypted: Option<bool>,
    /// Case-insensitive substring match on the room name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name_like: Option<String>,
}

/// Supported sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    /// Most recent activity first.
    ByRecency,
    /// Room name ascending, case-insensitive.
    ByName,
}

impl SortKey {
    /// Wire name of this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByRecency => SORT_BY_RECENCY,
            Self::ByName => SORT_BY_NAME,
        }
    }
}

impl FromStr for SortKey {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SORT_BY_RECENCY => Ok(Self::ByRecency),
            SORT_BY_NAME => Ok(Self::ByName),
            other => Err(RequestError::UnknownSortKey(other.to_string())),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room payload sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// The room.
    pub room_id: RoomId,
    /// Display name, empty if unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Most recent events, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<serde_json::Value>,
    /// Joined member count.
    #[serde(default)]
    pub joined_count: u32,
    /// Invited member count.
    #[serde(default)]
    pub invited_count: u32,
}

/// A single list operation.
///
/// Replaying a list's operations in order over the client's previous
/// window yields the server's current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ResponseOp {
    /// Replace an entire requested range.
    #[serde(rename = "SYNC")]
    Sync {
        /// Originating list index.
        list: usize,
        /// The requested range being replaced.
        range: [u64; 2],
        /// Rooms in the range, in list order.
        rooms: Vec<Room>,
    },
    /// A room enters at `index`; later entries in the range shift down.
    #[serde(rename = "INSERT")]
    Insert {
        /// Originating list index.
        list: usize,
        /// Position the room now occupies.
        index: usize,
        /// The room.
        room: Room,
    },
    /// The room at `index` leaves; later entries in the range shift up.
    #[serde(rename = "DELETE")]
    Delete {
        /// Originating list index.
        list: usize,
        /// Position being vacated.
        index: usize,
    },
    /// The room at `index` kept its position but changed.
    #[serde(rename = "UPDATE")]
    Update {
        /// Originating list index.
        list: usize,
        /// Position of the room.
        index: usize,
        /// The updated room.
        room: Room,
    },
}

impl ResponseOp {
    /// Wire name of the operation.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "SYNC",
            Self::Insert { .. } => "INSERT",
            Self::Delete { .. } => "DELETE",
            Self::Update { .. } => "UPDATE",
        }
    }

    /// List this operation applies to.
    pub fn list(&self) -> usize {
        match self {
            Self::Sync { list, .. }
            | Self::Insert { list, .. }
            | Self::Delete { list, .. }
            | Self::Update { list, .. } => *list,
        }
    }

    /// Index for single-room operations.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Sync { .. } => None,
            Self::Insert { index, .. } | Self::Delete { index, .. } | Self::Update { index, .. } => {
                Some(*index)
            }
        }
    }

    /// Room payload for INSERT and UPDATE.
    pub fn room(&self) -> Option<&Room> {
        match self {
            Self::Insert { room, .. } | Self::Update { room, .. } => Some(room),
            _ => None,
        }
    }
}

/// Response to a sync request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Operations across all lists, in application order.
    #[serde(default)]
    pub ops: Vec<ResponseOp>,
    /// Filtered room count, one per requested list.
    #[serde(default)]
    pub counts: Vec<usize>,
    /// Last metadata position reflected in this response.
    #[serde(default)]
    pub pos: Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> Room {
        Room {
            room_id: RoomId::new(id),
            name: String::new(),
            timeline: Vec::new(),
            joined_count: 0,
            invited_count: 0,
        }
    }

    #[test]
    fn request_parses_lists() {
        let body = br#"{
            "lists": [{
                "sort": ["by_recency", "by_name"],
                "rooms": [[0, 9]],
                "timeline_limit": 1,
                "filters": { "is_encrypted": true }
            }]
        }"#;
        let req = Request::from_json(body).unwrap();
        assert_eq!(req.lists.len(), 1);
        let list = &req.lists[0];
        assert_eq!(list.sort, vec!["by_recency", "by_name"]);
        assert_eq!(list.rooms, SliceRanges::new(vec![[0, 9]]));
        assert_eq!(list.timeline_limit, 1);
        assert_eq!(list.filters.as_ref().unwrap().is_encrypted, Some(true));
    }

    #[test]
    fn request_defaults_missing_fields() {
        let req = Request::from_json(br#"{"lists":[{}]}"#).unwrap();
        assert!(req.lists[0].sort.is_empty());
        assert!(req.lists[0].rooms.is_empty());
        assert!(req.lists[0].filters.is_none());
    }

    #[test]
    fn malformed_request_is_an_error() {
        let err = Request::from_json(b"{\"lists\": 3}").unwrap_err();
        assert!(matches!(err, RequestError::Json(_)));
    }

    #[test]
    fn sort_key_parsing() {
        assert_eq!("by_recency".parse::<SortKey>().unwrap(), SortKey::ByRecency);
        assert_eq!("by_name".parse::<SortKey>().unwrap(), SortKey::ByName);
        assert!(matches!(
            "by_size".parse::<SortKey>(),
            Err(RequestError::UnknownSortKey(k)) if k == "by_size"
        ));
    }

    #[test]
    fn ops_are_tagged_on_the_wire() {
        let ops = vec![
            ResponseOp::Delete { list: 0, index: 2 },
            ResponseOp::Insert {
                list: 0,
                index: 0,
                room: room("!a:localhost"),
            },
        ];
        let json = serde_json::to_value(&ops).unwrap();
        assert_eq!(json[0]["op"], "DELETE");
        assert_eq!(json[0]["index"], 2);
        assert_eq!(json[0]["list"], 0);
        assert!(json[0].get("room").is_none());
        assert_eq!(json[1]["op"], "INSERT");
        assert_eq!(json[1]["room"]["room_id"], "!a:localhost");
    }

    #[test]
    fn sync_op_carries_range_and_rooms() {
        let op = ResponseOp::Sync {
            list: 1,
            range: [0, 9],
            rooms: vec![room("!b:localhost"), room("!c:localhost")],
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "SYNC");
        assert_eq!(json["range"], serde_json::json!([0, 9]));
        assert_eq!(json["rooms"].as_array().unwrap().len(), 2);

        let back: ResponseOp = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
        assert_eq!(back.list(), 1);
        assert_eq!(back.index(), None);
    }

    #[test]
    fn response_keeps_op_order_across_lists() {
        let response = Response {
            ops: vec![
                ResponseOp::Delete { list: 0, index: 1 },
                ResponseOp::Delete { list: 1, index: 4 },
                ResponseOp::Update {
                    list: 0,
                    index: 0,
                    room: room("!a:localhost"),
                },
            ],
            counts: vec![3, 5],
            pos: Position::new(7),
        };
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("\"counts\":[3,5]"));
        assert!(text.contains("\"pos\":7"));

        let back: Response = serde_json::from_str(&text).unwrap();
        let order: Vec<_> = back.ops.iter().map(|op| (op.list(), op.op())).collect();
        assert_eq!(order, vec![(0, "DELETE"), (1, "DELETE"), (0, "UPDATE")]);
    }

    #[test]
    fn room_omits_empty_optional_fields() {
        let json = serde_json::to_string(&room("!x:localhost")).unwrap();
        assert!(!json.contains("name"));
        assert!(!json.contains("timeline"));
    }
}
