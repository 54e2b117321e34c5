//! # sync-proxy
//!
//! Sliding sync proxy core: per-connection list state, long-polling and
//! event fan-out.
//!
//! This crate:
//! - Keeps one [`conn::ConnState`] per (user, connection) with the baselines
//!   the client last received
//! - Answers sync requests with SYNC or incremental list operations, waiting
//!   for room changes when there is nothing new
//! - Applies ingested events to a [`store::RoomStore`] and wakes every
//!   affected connection
//!
//! ## Architecture
//!
//! ```text
//! ingestion ──► SyncProxy::push_new_event ──► RoomStore::apply_event
//!                       │
//!                       └──► ConnState::on_update (per affected connection)
//!                                   │
//! transport ──► SyncProxy::handle_incoming_request ──► ConnState ──► Response
//! ```
//!
//! The HTTP sync transport is not part of this crate; [`http`] only serves
//! `/health` and `/metrics`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod conn;
pub mod error;
pub mod http;
pub mod limits;
pub mod server;
pub mod store;
