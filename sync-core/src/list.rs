//! The sorted, filtered view over a user's rooms.
//!
//! A [`SortedList`] holds its own copy of every room that passes the filter,
//! kept in sort order. Single-room updates are applied in place with a binary
//! search and reported as a classified [`ListDelta`], so the diff computer
//! never has to compare whole orderings.

use sync_types::RoomId;

use crate::{ListFilter, RoomSummary, SortChain};

/// Effect of one room update on a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDelta {
    /// The list is unaffected: the room stays out of it, or its entry is
    /// already identical.
    Unchanged,
    /// The room entered the list at `index`.
    Inserted {
        /// New position.
        index: usize,
    },
    /// The room left the list from `index`.
    Removed {
        /// Old position.
        index: usize,
    },
    /// The room changed position. `from != to`; indices on either side of
    /// the move shift by one.
    Moved {
        /// Old position.
        from: usize,
        /// New position, in the list after the move.
        to: usize,
    },
    /// The room kept its position but its content changed.
    Updated {
        /// Position of the room.
        index: usize,
    },
}

impl ListDelta {
    /// True if the list did not change.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Rooms passing a filter, in sort-chain order.
#[derive(Debug, Clone)]
pub struct SortedList {
    sort: SortChain,
    filter: ListFilter,
    entries: Vec<RoomSummary>,
}

impl SortedList {
    /// Filter and sort `rooms` from scratch. O(n log n).
    pub fn recompute<'a>(
        rooms: impl IntoIterator<Item = &'a RoomSummary>,
        filter: ListFilter,
        sort: SortChain,
    ) -> Self {
        let mut entries: Vec<RoomSummary> = rooms
            .into_iter()
            .filter(|room| filter.matches(room))
            .cloned()
            .collect();
        // Strict total order, so unstable sort is deterministic.
        entries.sort_unstable_by(|a, b| sort.compare(a, b));
        Self {
            sort,
            filter,
            entries,
        }
    }

    /// Number of rooms passing the filter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no room passes the filter.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The room at `index`.
    pub fn get(&self, index: usize) -> Option<&RoomSummary> {
        self.entries.get(index)
    }

    /// Position of a room, if it is in the list.
    pub fn position(&self, room_id: &RoomId) -> Option<usize> {
        self.entries.iter().position(|r| &r.room_id == room_id)
    }

    /// Room ids in order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.entries.iter().map(|r| r.room_id.clone()).collect()
    }

    /// Rooms at indices `start..=end`, clipped to the list length.
    pub fn window(&self, start: usize, end: usize) -> &[RoomSummary] {
        if start >= self.entries.len() {
            return &[];
        }
        let end = end.min(self.entries.len() - 1);
        &self.entries[start..=end]
    }

    /// The sort chain this list was built with.
    pub fn sort(&self) -> &SortChain {
        &self.sort
    }

    /// The filter this list was built with.
    pub fn filter(&self) -> &ListFilter {
        &self.filter
    }

    /// Apply a new summary for one room.
    ///
    /// `present` is false when the room is no longer among the user's rooms;
    /// the room is then removed regardless of the filter.
    pub fn apply_update(&mut self, summary: &RoomSummary, present: bool) -> ListDelta {
        let old = self.position(&summary.room_id);
        let passes = present && self.filter.matches(summary);

        match (old, passes) {
            (None, false) => ListDelta::Unchanged,
            (None, true) => {
                let index = self.insertion_point(summary);
                self.entries.insert(index, summary.clone());
                ListDelta::Inserted { index }
            }
            (Some(index), false) => {
                self.entries.remove(index);
                ListDelta::Removed { index }
            }
            (Some(from), true) if self.entries[from] == *summary => ListDelta::Unchanged,
            (Some(from), true) => {
                self.entries.remove(from);
                let to = self.insertion_point(summary);
                self.entries.insert(to, summary.clone());
                if from == to {
                    ListDelta::Updated { index: to }
                } else {
                    ListDelta::Moved { from, to }
                }
            }
        }
    }

    fn insertion_point(&self, summary: &RoomSummary) -> usize {
        self.entries
            .partition_point(|entry| self.sort.compare(entry, summary).is_lt())
    }
}
