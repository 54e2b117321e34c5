//! Requested index ranges into a sorted room list.

use serde::{Deserialize, Serialize};

use crate::RequestError;

/// The index ranges a client has requested for one list.
///
/// Each range is `[start, end]`, inclusive and zero-based. A valid set is
/// sorted ascending with no overlaps; see [`SliceRanges::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceRanges(Vec<[u64; 2]>);

impl SliceRanges {
    /// Build ranges from `[start, end]` pairs. Does not validate.
    pub fn new(ranges: Vec<[u64; 2]>) -> Self {
        Self(ranges)
    }

    /// Check start <= end for every range and that ranges ascend without
    /// overlapping. `list` is only used to label the error.
    pub fn validate(&self, list: usize) -> Result<(), RequestError> {
        let mut previous_end: Option<u64> = None;
        for &[start, end] in &self.0 {
            if start > end {
                return Err(RequestError::InvalidRange { list, start, end });
            }
            if let Some(prev) = previous_end {
                if start <= prev {
                    return Err(RequestError::OverlappingRanges { list, start, end });
                }
            }
            previous_end = Some(end);
        }
        Ok(())
    }

    /// Iterate over the ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = [u64; 2]> + '_ {
        self.0.iter().copied()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no ranges were requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<[u64; 2]>> for SliceRanges {
    fn from(ranges: Vec<[u64; 2]>) -> Self {
        Self::new(ranges)
    }
}
