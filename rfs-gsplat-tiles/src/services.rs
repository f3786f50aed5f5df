// External asynchronous services: depth sort and attribute/texture encoding
//
// Both follow the same contract: `submit` either hands back a Task, or None
// when the service cannot take another request right now (caller retries on a
// later frame). Requests carry the aggregation epoch they were built from.

use std::sync::Arc;

use glam::Mat4;

use crate::splat_set::{ColorLayout, SplatSet};
use crate::task::Task;

/// Snapshot sent to the depth sorter
#[derive(Debug, Clone)]
pub struct SortRequest {
    /// Aggregation epoch of the positions
    pub epoch: u64,
    /// Flat xyz positions (3 * count)
    pub positions: Arc<[f32]>,
    /// Model-view transform the depths are taken in
    pub model_view: Mat4,
    pub count: usize,
}

impl SortRequest {
    pub fn new(splats: &SplatSet, model_view: Mat4) -> Self {
        Self {
            epoch: splats.epoch(),
            positions: Arc::clone(splats.positions()),
            model_view,
            count: splats.len(),
        }
    }
}

/// Snapshot sent to the splat encoder
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub epoch: u64,
    pub positions: Arc<[f32]>,
    pub scales: Arc<[f32]>,
    pub rotations: Arc<[f32]>,
    /// Colors after modifications/filters were applied
    pub colors: Arc<[u8]>,
    pub color_layout: ColorLayout,
    /// Source ids to embed next to each splat
    pub original_ids: Option<Arc<[u32]>>,
    pub count: usize,
}

impl EncodeRequest {
    /// Request with the SplatSet's own colors and original ids
    pub fn new(splats: &SplatSet) -> Self {
        Self {
            epoch: splats.epoch(),
            positions: Arc::clone(splats.positions()),
            scales: Arc::clone(splats.scales()),
            rotations: Arc::clone(splats.rotations()),
            colors: Arc::clone(splats.colors()),
            color_layout: splats.color_layout(),
            original_ids: Some(Arc::clone(splats.original_id_by_aggregate())),
            count: splats.len(),
        }
    }

    pub fn with_colors(mut self, colors: Arc<[u8]>) -> Self {
        self.colors = colors;
        self
    }
}

/// Encoded attribute texture, consumed by the renderer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedSplats {
    pub data: Vec<u8>,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

/// Asynchronous depth sorter
///
/// The resolved value must be a permutation of `0..count`, ordered back to
/// front.
pub trait DepthSortService: Send + Sync {
    fn submit(&self, request: SortRequest) -> Option<Task<Vec<u32>>>;
}

/// Asynchronous attribute/texture encoder
pub trait SplatEncodingService: Send + Sync {
    fn submit(&self, request: EncodeRequest) -> Option<Task<EncodedSplats>>;
}
