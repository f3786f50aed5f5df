// Error types for the splat orchestration pipeline
//
// Validation problems are reported, never raised: batch mutations collect them
// into a MutationReport. Aggregation, sort and encode failures are hard errors
// because they block the render-ready state.

use thiserror::Error;

use crate::splat_set::TileId;

/// Failure reported by an external asynchronous service (sorter, encoder)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Recoverable, per-entry problem in an interactive mutation batch
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("splat index {index} out of range (count: {count})")]
    IndexOutOfRange { index: i64, count: usize },

    #[error("original id {0} has no aggregate index")]
    UnmappedOriginalId(u32),

    #[error("color group {0} out of range (valid: 1-63)")]
    ColorGroupOutOfRange(i32),
}

/// Inconsistent tile input; fatal for the aggregation pass that saw it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("tile {tile}: {attribute} has {actual} components, expected {expected}")]
    AttributeLength {
        tile: TileId,
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tile {tile}: {len} color bytes is neither 3 nor 4 per point ({points} points)")]
    ColorLayout { tile: TileId, len: usize, points: usize },

    #[error("tile {tile}: {found} color components per point, previous tiles use {expected}")]
    MixedColorLayout {
        tile: TileId,
        expected: usize,
        found: usize,
    },

    #[error("aggregate splat count {0} does not fit in a u32 index")]
    TooManySplats(usize),
}

/// Depth sort failure; terminal for the SortScheduler until cleared
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    #[error("depth sort rejected: {0}")]
    Rejected(#[from] ServiceError),

    #[error("sort result has {actual} entries, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("sort result is not a permutation (entry {value} at position {position})")]
    NotAPermutation { position: usize, value: u32 },
}

/// Attribute/texture encoding failure for one aggregation epoch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("splat encoding rejected for epoch {epoch}: {source}")]
    Rejected { epoch: u64, source: ServiceError },

    #[error("encoded texture {width}x{height} cannot hold {count} splats")]
    Dimensions { width: u32, height: u32, count: usize },
}

/// Per-frame update failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Sort(#[from] SortError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}
