//! Range tracking and diff computation.
//!
//! Turns list deltas into the operations a client needs to bring its
//! windows up to date.
//!
//! ## Client model
//!
//! For each requested range `[s, e]` the client holds the rooms at indices
//! `s..=min(e, count - 1)`. Operations are range-local:
//!
//! - `DELETE i` removes index `i`; entries after it in the same range shift
//!   up and the range's last slot becomes empty.
//! - `INSERT i` shifts entries from `i` onwards down within the range (the
//!   last one falls off) and places the room at `i`.
//! - `UPDATE i` replaces the room at `i`.
//! - `SYNC` replaces the whole range.
//!
//! A move that crosses a range boundary is clamped to that boundary, which
//! produces the same shift the client would see if it held the whole list.

use sync_types::{RequestError, RequestList, ResponseOp, SliceRanges};

use crate::{ListDelta, ListFilter, RoomSummary, SortChain, SortedList};

/// Default number of deltas per list before falling back to a full SYNC.
pub const DEFAULT_MAX_INCREMENTAL_DELTAS: usize = 64;

/// A validated list definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDefinition {
    /// Sort chain.
    pub sort: SortChain,
    /// Filter.
    pub filter: ListFilter,
    /// Requested ranges.
    pub ranges: SliceRanges,
    /// Timeline events per room in payloads.
    pub timeline_limit: u32,
}

impl ListDefinition {
    /// Validate a wire list definition. `index` labels errors.
    pub fn from_request(
        index: usize,
        list: &RequestList,
        max_ranges: usize,
    ) -> Result<Self, RequestError> {
        if list.rooms.len() > max_ranges {
            return Err(RequestError::TooManyRanges {
                list: index,
                count: list.rooms.len(),
                limit: max_ranges,
            });
        }
        list.rooms.validate(index)?;
        Ok(Self {
            sort: SortChain::from_names(&list.sort)?,
            filter: ListFilter::from_request(list.filters.as_ref())?,
            ranges: list.rooms.clone(),
            timeline_limit: list.timeline_limit,
        })
    }

    /// True if a list built for `other` can serve as this definition's
    /// baseline. Sort and filter must match.
    pub fn ordering_compatible(&self, other: &ListDefinition) -> bool {
        self.sort == other.sort && self.filter == other.filter
    }
}

/// Per-list state kept across requests: the definition last answered and
/// the full ordering it produced.
#[derive(Debug, Clone)]
pub struct ListState {
    definition: ListDefinition,
    list: SortedList,
}

impl ListState {
    /// Build fresh state from a room set.
    pub fn new<'a>(
        definition: ListDefinition,
        rooms: impl IntoIterator<Item = &'a RoomSummary>,
    ) -> Self {
        let list = SortedList::recompute(
            rooms,
            definition.filter.clone(),
            definition.sort.clone(),
        );
        Self { definition, list }
    }

    /// The definition this state answers.
    pub fn definition(&self) -> &ListDefinition {
        &self.definition
    }

    /// The current ordering.
    pub fn list(&self) -> &SortedList {
        &self.list
    }

    /// One SYNC per requested range.
    pub fn sync_ops(&self, list_index: usize) -> Vec<ResponseOp> {
        self.definition
            .ranges
            .iter()
            .map(|range @ [start, end]| ResponseOp::Sync {
                list: list_index,
                range,
                rooms: self
                    .list
                    .window(to_index(start), to_index(end))
                    .iter()
                    .map(|r| r.to_room(self.definition.timeline_limit))
                    .collect(),
            })
            .collect()
    }
}

/// One room change seen by a connection, in arrival order.
#[derive(Debug, Clone, Copy)]
pub struct RoomChange<'a> {
    /// Latest summary of the room.
    pub summary: &'a RoomSummary,
    /// False if the room left the user's room set.
    pub present: bool,
}

/// Result of diffing one list.
#[derive(Debug, Clone, Default)]
pub struct ListDiff {
    /// Operations for the list, in order.
    pub ops: Vec<ResponseOp>,
    /// Size of the filtered set.
    pub count: usize,
    /// True if the list was answered with SYNC.
    pub full_sync: bool,
}

/// Computes per-list operations from a baseline and a batch of changes.
#[derive(Debug, Clone, Copy)]
pub struct DiffComputer {
    max_incremental_deltas: usize,
}

impl Default for DiffComputer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INCREMENTAL_DELTAS)
    }
}

impl DiffComputer {
    /// Create a computer that gives up on incremental diffs after
    /// `max_incremental_deltas` changed rooms in one list.
    pub fn new(max_incremental_deltas: usize) -> Self {
        Self {
            max_incremental_deltas,
        }
    }

    /// Diff one list.
    ///
    /// `baseline` is the state from the previous response for this slot.
    /// `changes` are applied to it in order. `rooms` is the user's full room
    /// set after `changes`, used whenever the list must be rebuilt.
    pub fn diff<'a>(
        &self,
        list_index: usize,
        baseline: Option<ListState>,
        definition: ListDefinition,
        changes: &[RoomChange<'_>],
        rooms: impl IntoIterator<Item = &'a RoomSummary>,
    ) -> (ListState, ListDiff) {
        let mut state = match baseline {
            Some(state) if state.definition.ordering_compatible(&definition) => state,
            _ => return full_sync(list_index, ListState::new(definition, rooms)),
        };

        let ranges_changed = state.definition.ranges != definition.ranges
            || state.definition.timeline_limit != definition.timeline_limit;
        state.definition = definition;

        let mut ops = Vec::new();
        let mut deltas = 0usize;
        for change in changes {
            let before = state.list.len();
            let delta = state.list.apply_update(change.summary, change.present);
            if delta.is_unchanged() {
                continue;
            }
            deltas += 1;
            if !ranges_changed && deltas <= self.max_incremental_deltas {
                ops.extend(delta_ops(list_index, &state, delta, before));
            }
        }

        if ranges_changed || deltas > self.max_incremental_deltas {
            return full_sync(list_index, state);
        }

        let diff = ListDiff {
            ops,
            count: state.list.len(),
            full_sync: false,
        };
        (state, diff)
    }
}

fn full_sync(list_index: usize, state: ListState) -> (ListState, ListDiff) {
    let diff = ListDiff {
        ops: state.sync_ops(list_index),
        count: state.list.len(),
        full_sync: true,
    };
    (state, diff)
}

fn to_index(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Last filled index of range `[start, end]` in a list of `len` rooms.
fn window_tail(start: usize, end: usize, len: usize) -> Option<usize> {
    if len == 0 || start >= len {
        None
    } else {
        Some(end.min(len - 1))
    }
}

/// Translate one delta into range-local operations. `state` is the list
/// after the delta, `before` its length prior to it.
fn delta_ops(
    list_index: usize,
    state: &ListState,
    delta: ListDelta,
    before: usize,
) -> Vec<ResponseOp> {
    let list = &state.list;
    let timeline_limit = state.definition.timeline_limit;
    let after = list.len();
    let insert = |index: usize| {
        list.get(index).map(|room| ResponseOp::Insert {
            list: list_index,
            index,
            room: room.to_room(timeline_limit),
        })
    };

    let mut ops = Vec::new();
    for [start, end] in state.definition.ranges.iter() {
        let (start, end) = (to_index(start), to_index(end));
        match delta {
            ListDelta::Unchanged => {}
            ListDelta::Updated { index } => {
                if index >= start && index <= end {
                    if let Some(room) = list.get(index) {
                        ops.push(ResponseOp::Update {
                            list: list_index,
                            index,
                            room: room.to_room(timeline_limit),
                        });
                    }
                }
            }
            ListDelta::Moved { from, to } => {
                let Some(tail) = window_tail(start, end, after) else {
                    continue;
                };
                if from.max(to) < start || from.min(to) > tail {
                    continue;
                }
                ops.push(ResponseOp::Delete {
                    list: list_index,
                    index: from.clamp(start, tail),
                });
                ops.extend(insert(to.clamp(start, tail)));
            }
            ListDelta::Removed { index } => {
                let Some(old_tail) = window_tail(start, end, before) else {
                    continue;
                };
                if index > old_tail {
                    continue;
                }
                ops.push(ResponseOp::Delete {
                    list: list_index,
                    index: index.max(start),
                });
                // Refill the slot vacated at the tail of the window.
                if old_tail < after {
                    ops.extend(insert(old_tail));
                }
            }
            ListDelta::Inserted { index } => {
                let Some(tail) = window_tail(start, end, after) else {
                    continue;
                };
                if index > tail {
                    continue;
                }
                ops.extend(insert(index.max(start)));
            }
        }
    }
    ops
}
