//! # sync-core
//!
//! Pure list logic for the sliding sync proxy (no I/O, instant tests).
//!
//! This crate keeps a user's rooms as sorted, filtered lists and turns
//! room changes into the window operations a client replays.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//!
//! Storage, connections and long-polling live in `sync-proxy`, which feeds
//! room changes into these types and ships the resulting operations.
//!
//! ## Pipeline
//!
//! ```text
//! RoomSummary ──► SortedList::apply_update ──► ListDelta
//!                                                 │
//!                   ListDefinition (ranges) ──► DiffComputer ──► ResponseOp
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod list;
pub mod room;
pub mod sort;

pub use diff::{
    DiffComputer, ListDefinition, ListDiff, ListState, RoomChange, DEFAULT_MAX_INCREMENTAL_DELTAS,
};
pub use list::{ListDelta, SortedList};
pub use room::RoomSummary;
pub use sort::{FilterPredicate, ListFilter, SortChain};
