//! Error types for sliding sync requests.

use thiserror::Error;

/// Errors raised while parsing or validating a sync request.
///
/// All of these are raised before any connection state is touched.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Request body is not valid JSON for the request shape.
    #[error("malformed request: {0}")]
    Json(#[source] serde_json::Error),

    /// A range whose start is after its end.
    #[error("list {list}: invalid range [{start}, {end}]")]
    InvalidRange {
        /// List the range belongs to.
        list: usize,
        /// Range start.
        start: u64,
        /// Range end.
        end: u64,
    },

    /// Two ranges overlap or are not in ascending order.
    #[error("list {list}: ranges overlap or are not ascending at [{start}, {end}]")]
    OverlappingRanges {
        /// List the ranges belong to.
        list: usize,
        /// Start of the offending range.
        start: u64,
        /// End of the offending range.
        end: u64,
    },

    /// More ranges than the server allows for one list.
    #[error("list {list}: {count} ranges exceeds limit of {limit}")]
    TooManyRanges {
        /// List the ranges belong to.
        list: usize,
        /// Number of ranges requested.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// More lists than the server allows.
    #[error("{count} lists exceeds limit of {limit}")]
    TooManyLists {
        /// Number of lists requested.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A sort key the server does not know.
    #[error("unknown sort key: {0}")]
    UnknownSortKey(String),

    /// A filter with an unusable or conflicting value.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}
