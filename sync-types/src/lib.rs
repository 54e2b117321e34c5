//! # sync-types
//!
//! Wire format types for the sliding sync proxy.
//!
//! This crate provides the foundational types used across all crates:
//! - [`RoomId`], [`UserId`], [`ConnId`], [`Position`] - Identity and ordering types
//! - [`SliceRanges`] - Requested index windows into a sorted list
//! - [`Request`], [`Response`], [`ResponseOp`] - JSON request/response bodies
//! - [`RequestError`] - Request validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod ranges;

pub use error::RequestError;
pub use ids::{ConnId, Position, RoomId, UserId};
pub use messages::{
    Request, RequestFilters, RequestList, Response, ResponseOp, Room, SortKey, SORT_BY_NAME,
    SORT_BY_RECENCY,
};
pub use ranges::SliceRanges;
