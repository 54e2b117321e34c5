//! Sort chains and filter predicates.
//!
//! Both are closed enums resolved once when a request is validated. A sort
//! chain always ends with room id ascending, so two distinct rooms never
//! compare equal.

use std::cmp::Ordering;

use sync_types::{RequestError, RequestFilters, SortKey};

use crate::RoomSummary;

/// Ordered chain of sort keys, most significant first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortChain(Vec<SortKey>);

impl SortChain {
    /// Resolve wire sort names. An empty list means recency.
    pub fn from_names(names: &[String]) -> Result<Self, RequestError> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let keys = names
            .iter()
            .map(|name| name.parse::<SortKey>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(keys))
    }

    /// Build a chain from already-resolved keys.
    pub fn new(keys: Vec<SortKey>) -> Self {
        if keys.is_empty() {
            Self::default()
        } else {
            Self(keys)
        }
    }

    /// The keys in this chain, without the implicit room id tie-break.
    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    /// Compare two rooms. Total: falls back to room id ascending.
    pub fn compare(&self, a: &RoomSummary, b: &RoomSummary) -> Ordering {
        self.0
            .iter()
            .map(|key| compare_by(*key, a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.room_id.cmp(&b.room_id))
    }
}

impl Default for SortChain {
    fn default() -> Self {
        Self(vec![SortKey::ByRecency])
    }
}

fn compare_by(key: SortKey, a: &RoomSummary, b: &RoomSummary) -> Ordering {
    match key {
        SortKey::ByRecency => b.last_message_timestamp.cmp(&a.last_message_timestamp),
        SortKey::ByName => a
            .name
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(b.name.chars().flat_map(char::to_lowercase)),
    }
}

/// A single filter predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPredicate {
    /// Room encryption equals the value. Unknown encryption counts as
    /// unencrypted, so `true` and `false` partition every room set.
    IsEncrypted(bool),
    /// Room name contains the (lowercased) needle.
    RoomNameLike(String),
}

impl FilterPredicate {
    /// Evaluate against a room.
    pub fn matches(&self, room: &RoomSummary) -> bool {
        match self {
            Self::IsEncrypted(want) => room.is_encrypted.unwrap_or(false) == *want,
            Self::RoomNameLike(needle) => room.name.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// Conjunction of predicates. Empty matches every room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter(Vec<FilterPredicate>);

impl ListFilter {
    /// Resolve wire filters.
    pub fn from_request(filters: Option<&RequestFilters>) -> Result<Self, RequestError> {
        let Some(filters) = filters else {
            return Ok(Self::default());
        };
        let mut predicates = Vec::new();
        if let Some(encrypted) = filters.is_encrypted {
            predicates.push(FilterPredicate::IsEncrypted(encrypted));
        }
        if let Some(like) = &filters.room_name_like {
            let needle = like.trim().to_lowercase();
            if needle.is_empty() {
                return Err(RequestError::InvalidFilter(
                    "room_name_like must not be empty".to_string(),
                ));
            }
            predicates.push(FilterPredicate::RoomNameLike(needle));
        }
        Ok(Self(predicates))
    }

    /// Build a filter from predicates.
    pub fn new(predicates: Vec<FilterPredicate>) -> Self {
        Self(predicates)
    }

    /// True if every predicate matches.
    pub fn matches(&self, room: &RoomSummary) -> bool {
        self.0.iter().all(|p| p.matches(room))
    }
}
