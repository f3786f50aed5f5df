// Flat splat dataset merged from the selected tiles

use std::fmt;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

/// Identity of a streamed tile (stable across frames while the tile stays loaded)
///
/// A tile's buffers are treated as immutable while its id and point count
/// stay the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-tile attribute buffers handed to the aggregator
///
/// Layout: `positions[3n]`, `rotations[4n]` (x, y, z, w), `scales[3n]`,
/// `colors[3n | 4n]`, optional `original_ids[n]`.
#[derive(Debug, Clone, Copy)]
pub struct TileSplats<'a> {
    pub id: TileId,
    pub points_length: usize,
    pub positions: &'a [f32],
    pub rotations: &'a [f32],
    pub scales: &'a [f32],
    pub colors: &'a [u8],
    /// Source-dataset id of every point, when the tile carries them
    pub original_ids: Option<&'a [u32]>,
    /// First source id of a tile whose points are a contiguous source range
    pub original_id_start: Option<u32>,
}

impl<'a> TileSplats<'a> {
    pub fn new(
        id: TileId,
        positions: &'a [f32],
        rotations: &'a [f32],
        scales: &'a [f32],
        colors: &'a [u8],
    ) -> Self {
        Self {
            id,
            points_length: positions.len() / 3,
            positions,
            rotations,
            scales,
            colors,
            original_ids: None,
            original_id_start: None,
        }
    }

    pub fn with_original_ids(mut self, original_ids: &'a [u32]) -> Self {
        self.original_ids = Some(original_ids);
        self
    }

    pub fn with_original_id_start(mut self, start: u32) -> Self {
        self.original_id_start = Some(start);
        self
    }
}

/// Number of color bytes stored per splat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorLayout {
    Rgb,
    #[default]
    Rgba,
}

impl ColorLayout {
    pub fn components(self) -> usize {
        match self {
            ColorLayout::Rgb => 3,
            ColorLayout::Rgba => 4,
        }
    }

    pub fn from_components(components: usize) -> Option<Self> {
        match components {
            3 => Some(ColorLayout::Rgb),
            4 => Some(ColorLayout::Rgba),
            _ => None,
        }
    }
}

/// Why a tile fell back to a contiguous original-id range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The tile carries no original ids
    Missing,
    /// The tile carries original ids, but not one per point
    LengthMismatch { len: usize },
}

/// How a tile's original ids were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMapping {
    /// Ids copied verbatim from the tile
    Exact,
    /// Degraded mode: ids assumed to be `start..start + n`
    Contiguous { start: u32, reason: FallbackReason },
}

impl IdMapping {
    pub fn is_exact(&self) -> bool {
        matches!(self, IdMapping::Exact)
    }
}

/// Where one tile landed in the aggregate buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileIdRange {
    pub tile: TileId,
    pub aggregate_start: u32,
    pub len: u32,
    /// Smallest original id of the tile (None for an empty tile)
    pub original_min: Option<u32>,
    /// Largest original id of the tile (None for an empty tile)
    pub original_max: Option<u32>,
    pub mapping: IdMapping,
}

impl TileIdRange {
    pub fn aggregate_range(&self) -> std::ops::Range<u32> {
        self.aggregate_start..self.aggregate_start + self.len
    }
}

/// Aggregated splat data (CPU side)
///
/// Attribute buffers are shared immutably so sort and encode requests can hold
/// a snapshot without copying. The set is rebuilt wholesale, never patched.
#[derive(Debug, Clone, Default)]
pub struct SplatSet {
    pub(crate) count: usize,
    pub(crate) positions: Arc<[f32]>,
    pub(crate) rotations: Arc<[f32]>,
    pub(crate) scales: Arc<[f32]>,
    pub(crate) colors: Arc<[u8]>,
    pub(crate) color_layout: ColorLayout,
    pub(crate) original_id_by_aggregate: Arc<[u32]>,
    pub(crate) aggregate_by_original_id: FxHashMap<u32, u32>,
    pub(crate) tile_ranges: Vec<TileIdRange>,
    pub(crate) epoch: u64,
}

impl SplatSet {
    /// Number of splats
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Aggregation epoch that produced this set (0 = never aggregated)
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn positions(&self) -> &Arc<[f32]> {
        &self.positions
    }

    pub fn rotations(&self) -> &Arc<[f32]> {
        &self.rotations
    }

    pub fn scales(&self) -> &Arc<[f32]> {
        &self.scales
    }

    pub fn colors(&self) -> &Arc<[u8]> {
        &self.colors
    }

    pub fn color_layout(&self) -> ColorLayout {
        self.color_layout
    }

    pub fn original_id_by_aggregate(&self) -> &Arc<[u32]> {
        &self.original_id_by_aggregate
    }

    pub fn tile_ranges(&self) -> &[TileIdRange] {
        &self.tile_ranges
    }

    /// True when every tile supplied its own original ids
    pub fn has_exact_id_mapping(&self) -> bool {
        self.tile_ranges.iter().all(|range| range.mapping.is_exact())
    }

    pub fn original_id(&self, aggregate_index: usize) -> Option<u32> {
        self.original_id_by_aggregate.get(aggregate_index).copied()
    }

    /// Aggregate index of a source point, if it is part of the current set
    pub fn aggregate_index(&self, original_id: u32) -> Option<usize> {
        self.aggregate_by_original_id
            .get(&original_id)
            .map(|&index| index as usize)
            .filter(|&index| index < self.count)
    }

    pub fn position(&self, index: usize) -> Option<Vec3> {
        let p = self.positions.get(index * 3..index * 3 + 3)?;
        Some(Vec3::new(p[0], p[1], p[2]))
    }

    pub fn scale(&self, index: usize) -> Option<Vec3> {
        let s = self.scales.get(index * 3..index * 3 + 3)?;
        Some(Vec3::new(s[0], s[1], s[2]))
    }

    pub fn rotation(&self, index: usize) -> Option<Quat> {
        let r = self.rotations.get(index * 4..index * 4 + 4)?;
        Some(Quat::from_xyzw(r[0], r[1], r[2], r[3]))
    }

    /// Color bytes of one splat; alpha is 255 for RGB data
    pub fn color(&self, index: usize) -> Option<[u8; 4]> {
        let components = self.color_layout.components();
        let c = self.colors.get(index * components..(index + 1) * components)?;
        Some([c[0], c[1], c[2], if components == 4 { c[3] } else { 255 }])
    }

    /// Axis-aligned bounding box of all splat positions
    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        if self.is_empty() {
            return None;
        }

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in self.positions.chunks_exact(3) {
            let pos = Vec3::new(p[0], p[1], p[2]);
            min = min.min(pos);
            max = max.max(pos);
        }

        Some((min, max))
    }

    /// Center of the bounding box
    pub fn center(&self) -> Option<Vec3> {
        self.bounding_box().map(|(min, max)| (min + max) * 0.5)
    }
}
