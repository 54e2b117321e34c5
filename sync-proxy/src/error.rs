//! Error types for sync-proxy.

use sync_types::{RequestError, RoomId};

/// Main error type for sync-proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request failed validation. No connection state was touched.
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),

    /// The room metadata store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// The server already holds its maximum number of connections.
    #[error("too many connections (limit: {limit})")]
    TooManyConnections {
        /// Configured connection cap.
        limit: usize,
    },
}

impl ProxyError {
    /// True for failures the client may retry unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::RateLimited { .. } | Self::TooManyConnections { .. }
        )
    }
}

/// Room metadata store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that contradicts itself.
    #[error("store inconsistent: {0}")]
    Inconsistent(String),

    /// Room not found.
    #[error("room not found: {room_id}")]
    RoomNotFound {
        /// The room that was not found.
        room_id: RoomId,
    },
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
