// Boundary clustering for ring outlines
//
// Selected splats are bucketed into a square grid on the x/y plane. Cells with
// too few occupied neighbors are "boundary" cells and only their splats get a
// ring, which keeps the outline sparse for large selections.
//
// Bucketing ignores z: a planar approximation that is exact for top-down,
// near-planar selections and over-reports interior cells for steep geometry.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::splat_set::SplatSet;

/// Clustering parameters (always stored clamped)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryParameters {
    /// Cell size as a multiple of the average splat radius [0.1, 20]
    pub cell_multiplier: f32,
    /// Lower bound on the cell size, in world units [0.01, 10]
    pub min_cell_size: f32,
    /// Neighbor search radius, in cells [1, 4]
    pub neighbor_range: u32,
    /// Cells whose occupied-neighbor ratio is below this are boundary cells [0, 1]
    pub min_coverage: f32,
}

impl Default for BoundaryParameters {
    fn default() -> Self {
        Self {
            cell_multiplier: 2.5,
            min_cell_size: 0.5,
            neighbor_range: 1,
            min_coverage: 0.75,
        }
    }
}

impl BoundaryParameters {
    /// Finer grid, more rings (small or sparse selections)
    pub fn fine() -> Self {
        Self {
            cell_multiplier: 1.5,
            min_cell_size: 0.1,
            ..Default::default()
        }
    }

    /// Coarser grid with a wider neighborhood (very large selections)
    pub fn coarse() -> Self {
        Self {
            cell_multiplier: 5.0,
            min_cell_size: 1.0,
            neighbor_range: 2,
            min_coverage: 0.6,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            cell_multiplier: self.cell_multiplier.clamp(0.1, 20.0),
            min_cell_size: self.min_cell_size.clamp(0.01, 10.0),
            neighbor_range: self.neighbor_range.clamp(1, 4),
            min_coverage: self.min_coverage.clamp(0.0, 1.0),
        }
    }

    /// Apply a partial update; returns true if any value changed
    pub fn apply(&mut self, update: BoundaryParameterUpdate) -> bool {
        let before = *self;
        let finite = |v: Option<f32>| v.filter(|v| v.is_finite());

        if let Some(v) = finite(update.cell_multiplier) {
            self.cell_multiplier = v.clamp(0.1, 20.0);
        }
        if let Some(v) = finite(update.min_cell_size) {
            self.min_cell_size = v.clamp(0.01, 10.0);
        }
        if let Some(v) = finite(update.neighbor_range) {
            self.neighbor_range = v.round().clamp(1.0, 4.0) as u32;
        }
        if let Some(v) = finite(update.min_coverage) {
            self.min_coverage = v.clamp(0.0, 1.0);
        }

        *self != before
    }
}

/// Partial parameter update; None fields are left unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundaryParameterUpdate {
    pub cell_multiplier: Option<f32>,
    pub min_cell_size: Option<f32>,
    /// Rounded to the nearest integer before clamping
    pub neighbor_range: Option<f32>,
    pub min_coverage: Option<f32>,
}

impl BoundaryParameterUpdate {
    pub fn with_cell_multiplier(mut self, value: f32) -> Self {
        self.cell_multiplier = Some(value);
        self
    }

    pub fn with_min_cell_size(mut self, value: f32) -> Self {
        self.min_cell_size = Some(value);
        self
    }

    pub fn with_neighbor_range(mut self, value: f32) -> Self {
        self.neighbor_range = Some(value);
        self
    }

    pub fn with_min_coverage(mut self, value: f32) -> Self {
        self.min_coverage = Some(value);
        self
    }
}

/// Diagnostics of the last boundary computation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundaryStats {
    pub selected_count: usize,
    pub boundary_count: usize,
    /// 0 when no positions were available
    pub cell_size: f32,
    pub cell_multiplier: f32,
    pub min_cell_size: f32,
    pub grid_cell_count: usize,
    pub neighbor_range: u32,
    pub coverage_threshold: f32,
    /// The whole selection was returned instead of a clustered subset
    pub fallback: bool,
}

impl BoundaryStats {
    fn empty(params: &BoundaryParameters) -> Self {
        Self {
            cell_multiplier: params.cell_multiplier,
            min_cell_size: params.min_cell_size,
            neighbor_range: params.neighbor_range,
            coverage_threshold: params.min_coverage,
            ..Default::default()
        }
    }
}

struct Cell {
    x: i32,
    y: i32,
    indices: Vec<u32>,
}

/// Pack two signed cell coordinates into one hash key
#[inline]
fn cell_key(x: i32, y: i32) -> u64 {
    ((x as u32 as u64) << 32) | (y as u32 as u64)
}

/// Mean of max(|sx|, |sy|) over usable samples, or `fallback_radius`
fn average_radius(splats: &SplatSet, selected: &[u32], fallback_radius: f32) -> f32 {
    let mut sum = 0.0f64;
    let mut samples = 0usize;
    for &index in selected {
        if let Some(scale) = splats.scale(index as usize) {
            let radius = scale.x.abs().max(scale.y.abs());
            if radius > 0.0 && radius.is_finite() {
                sum += radius as f64;
                samples += 1;
            }
        }
    }

    if samples > 0 {
        (sum / samples as f64) as f32
    } else {
        fallback_radius
    }
}

/// Compute the boundary subset of `selected`
///
/// Indices outside the SplatSet are ignored. The output is ordered by cell
/// (first occurrence in ascending index order), ascending within a cell.
pub fn compute_boundary(
    selected: &BTreeSet<u32>,
    splats: &SplatSet,
    params: &BoundaryParameters,
    fallback_radius: f32,
) -> (Vec<u32>, BoundaryStats) {
    let mut stats = BoundaryStats::empty(params);

    if selected.is_empty() {
        return (Vec::new(), stats);
    }

    // No positions to cluster yet
    if splats.is_empty() {
        let all: Vec<u32> = selected.iter().copied().collect();
        stats.selected_count = all.len();
        stats.boundary_count = all.len();
        stats.fallback = true;
        return (all, stats);
    }

    let count = splats.len() as u32;
    let selected: Vec<u32> = selected.range(..count).copied().collect();
    stats.selected_count = selected.len();
    if selected.is_empty() {
        return (Vec::new(), stats);
    }

    let radius = average_radius(splats, &selected, fallback_radius);
    let cell_size = (radius * params.cell_multiplier).max(params.min_cell_size);
    stats.cell_size = cell_size;

    let mut cells: Vec<Cell> = Vec::new();
    let mut grid: FxHashMap<u64, usize> = FxHashMap::default();
    for &index in &selected {
        let Some(p) = splats.position(index as usize) else {
            continue;
        };
        let x = (p.x / cell_size).floor() as i32;
        let y = (p.y / cell_size).floor() as i32;
        let slot = *grid.entry(cell_key(x, y)).or_insert_with(|| {
            cells.push(Cell { x, y, indices: Vec::new() });
            cells.len() - 1
        });
        cells[slot].indices.push(index);
    }
    stats.grid_cell_count = cells.len();

    let range = params.neighbor_range as i32;
    let slots = ((2 * range + 1) * (2 * range + 1) - 1) as f32;
    let mut boundary = Vec::new();
    let mut any_neighbors = false;

    for cell in &cells {
        let mut hits = 0u32;
        for dx in -range..=range {
            for dy in -range..=range {
                if (dx, dy) != (0, 0) && grid.contains_key(&cell_key(cell.x.wrapping_add(dx), cell.y.wrapping_add(dy))) {
                    hits += 1;
                }
            }
        }
        any_neighbors |= hits > 0;

        let coverage = hits as f32 / slots;
        if coverage < params.min_coverage {
            boundary.extend_from_slice(&cell.indices);
        }
    }

    // Nothing on the edge, or no cell has any neighbor: there is no cluster
    // structure to thin out, so ring the whole selection.
    stats.fallback = boundary.is_empty() || !any_neighbors;
    let boundary = if stats.fallback { selected } else { boundary };
    stats.boundary_count = boundary.len();

    (boundary, stats)
}

/// Lazily recomputed boundary cache
#[derive(Debug, Clone)]
pub struct BoundaryClusterer {
    params: BoundaryParameters,
    /// Radius used when no selected splat has a usable scale
    fallback_radius: f32,
    indices: Vec<u32>,
    stats: BoundaryStats,
    dirty: bool,
}

impl Default for BoundaryClusterer {
    fn default() -> Self {
        Self::new(BoundaryParameters::default())
    }
}

impl BoundaryClusterer {
    pub fn new(params: BoundaryParameters) -> Self {
        let params = params.clamped();
        Self {
            params,
            fallback_radius: 1.5,
            indices: Vec::new(),
            stats: BoundaryStats::empty(&params),
            dirty: true,
        }
    }

    pub fn parameters(&self) -> &BoundaryParameters {
        &self.params
    }

    /// Returns true (and invalidates the cache) if any parameter changed
    pub fn set_parameters(&mut self, update: BoundaryParameterUpdate) -> bool {
        let changed = self.params.apply(update);
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Fallback radius is derived from the outline width: max(width, 1.0)
    pub fn set_outline_width(&mut self, width: f32) {
        let radius = width.max(1.0);
        if radius != self.fallback_radius {
            self.fallback_radius = radius;
            self.dirty = true;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recompute if needed; returns true when a computation ran
    pub fn ensure(&mut self, selected: &BTreeSet<u32>, splats: &SplatSet) -> bool {
        if !self.dirty {
            return false;
        }

        let (indices, stats) = compute_boundary(selected, splats, &self.params, self.fallback_radius);
        debug!(
            "Boundary clustering: {} of {} selected splats on the boundary ({} cells, cell size {:.3}, fallback: {})",
            stats.boundary_count, stats.selected_count, stats.grid_cell_count, stats.cell_size, stats.fallback
        );
        self.indices = indices;
        self.stats = stats;
        self.dirty = false;
        true
    }

    /// Boundary indices, recomputed first if stale
    pub fn indices(&mut self, selected: &BTreeSet<u32>, splats: &SplatSet) -> &[u32] {
        self.ensure(selected, splats);
        &self.indices
    }

    /// Stats of the boundary, recomputed first if stale
    pub fn stats(&mut self, selected: &BTreeSet<u32>, splats: &SplatSet) -> BoundaryStats {
        self.ensure(selected, splats);
        self.stats
    }

    /// Stats of the last computation, possibly stale
    pub fn last_stats(&self) -> &BoundaryStats {
        &self.stats
    }
}
