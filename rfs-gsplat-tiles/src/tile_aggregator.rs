// Tile aggregation: merge per-tile attribute buffers into one flat SplatSet
//
// The aggregate is rebuilt wholesale whenever the ordered list of selected tile
// ids changes. Original ids are carried through so selections and color
// modifications can address source points independent of tiling.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::AggregationError;
use crate::splat_set::{ColorLayout, FallbackReason, IdMapping, SplatSet, TileId, TileIdRange, TileSplats};

/// Rebuild trigger + epoch counter around [`aggregate`]
#[derive(Debug, Default)]
pub struct TileAggregator {
    /// Tile ids of the last successful pass, in selection order
    last_tiles: Vec<TileId>,
    /// Point count of each entry in `last_tiles`
    last_lengths: Vec<usize>,
    /// Number of successful rebuilds
    epoch: u64,
    /// Force a rebuild even if the tile list is unchanged
    force: bool,
}

impl TileAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the last successful rebuild (0 = never)
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Tile ids of the last successful pass
    pub fn tiles(&self) -> &[TileId] {
        &self.last_tiles
    }

    /// Force the next non-empty update to rebuild
    pub fn invalidate(&mut self) {
        self.force = true;
    }

    /// Check whether `tiles` would trigger a rebuild
    ///
    /// A tile whose id and point count are unchanged is assumed to carry the
    /// same buffers; call [`Self::invalidate`] after editing a tile in place.
    pub fn needs_rebuild(&self, tiles: &[TileSplats<'_>]) -> bool {
        if tiles.is_empty() {
            return false;
        }
        self.force
            || tiles.len() != self.last_tiles.len()
            || tiles
                .iter()
                .zip(self.last_tiles.iter().zip(&self.last_lengths))
                .any(|(tile, (id, len))| tile.id != *id || tile.points_length != *len)
    }

    /// Rebuild the SplatSet if the selected tiles changed
    ///
    /// Returns `Ok(None)` when nothing changed (or no tile is selected). On
    /// error nothing is recorded, so the next call retries the same tiles.
    pub fn update(&mut self, tiles: &[TileSplats<'_>]) -> Result<Option<SplatSet>, AggregationError> {
        if !self.needs_rebuild(tiles) {
            return Ok(None);
        }

        let epoch = self.epoch + 1;
        let set = aggregate(tiles, epoch)?;

        self.epoch = epoch;
        self.force = false;
        self.last_tiles.clear();
        self.last_tiles.extend(tiles.iter().map(|tile| tile.id));
        self.last_lengths.clear();
        self.last_lengths.extend(tiles.iter().map(|tile| tile.points_length));

        debug!(
            "Aggregated {} splats from {} tiles (epoch {}, exact ids: {})",
            set.len(),
            tiles.len(),
            epoch,
            set.has_exact_id_mapping()
        );
        Ok(Some(set))
    }
}

fn check_len(tile: &TileSplats<'_>, attribute: &'static str, actual: usize, per_point: usize) -> Result<(), AggregationError> {
    // Saturates on absurd point counts, which then fails the comparison below
    let expected = tile.points_length.saturating_mul(per_point);
    if actual != expected {
        return Err(AggregationError::AttributeLength {
            tile: tile.id,
            attribute,
            expected,
            actual,
        });
    }
    Ok(())
}

fn tile_color_layout(tile: &TileSplats<'_>) -> Result<Option<ColorLayout>, AggregationError> {
    let n = tile.points_length;
    if n == 0 {
        return if tile.colors.is_empty() {
            Ok(None)
        } else {
            Err(AggregationError::ColorLayout { tile: tile.id, len: tile.colors.len(), points: 0 })
        };
    }
    if tile.colors.len() % n != 0 {
        return Err(AggregationError::ColorLayout { tile: tile.id, len: tile.colors.len(), points: n });
    }
    ColorLayout::from_components(tile.colors.len() / n)
        .map(Some)
        .ok_or(AggregationError::ColorLayout { tile: tile.id, len: tile.colors.len(), points: n })
}

/// Validate every tile and settle the shared color layout
fn validate(tiles: &[TileSplats<'_>]) -> Result<(usize, ColorLayout), AggregationError> {
    let mut layout: Option<ColorLayout> = None;
    let mut total = 0usize;

    for tile in tiles {
        check_len(tile, "positions", tile.positions.len(), 3)?;
        check_len(tile, "rotations", tile.rotations.len(), 4)?;
        check_len(tile, "scales", tile.scales.len(), 3)?;

        if let Some(tile_layout) = tile_color_layout(tile)? {
            match layout {
                None => layout = Some(tile_layout),
                Some(expected) if expected != tile_layout => {
                    return Err(AggregationError::MixedColorLayout {
                        tile: tile.id,
                        expected: expected.components(),
                        found: tile_layout.components(),
                    });
                }
                Some(_) => {}
            }
        }

        total = total.saturating_add(tile.points_length);
    }

    if total > u32::MAX as usize {
        return Err(AggregationError::TooManySplats(total));
    }

    Ok((total, layout.unwrap_or_default()))
}

/// Merge `tiles` (in order) into one SplatSet stamped with `epoch`
///
/// Fails without producing anything if any tile's buffers disagree with its
/// point count.
pub fn aggregate(tiles: &[TileSplats<'_>], epoch: u64) -> Result<SplatSet, AggregationError> {
    let (count, color_layout) = validate(tiles)?;
    let components = color_layout.components();

    let mut positions = Vec::with_capacity(count * 3);
    let mut rotations = Vec::with_capacity(count * 4);
    let mut scales = Vec::with_capacity(count * 3);
    let mut colors = Vec::with_capacity(count * components);
    let mut original_ids = Vec::with_capacity(count);
    let mut inverse = FxHashMap::with_capacity_and_hasher(count, Default::default());
    let mut tile_ranges = Vec::with_capacity(tiles.len());

    for tile in tiles {
        let n = tile.points_length;
        let offset = positions.len() / 3;

        positions.extend_from_slice(tile.positions);
        rotations.extend_from_slice(tile.rotations);
        scales.extend_from_slice(tile.scales);
        colors.extend_from_slice(tile.colors);

        let mapping = match tile.original_ids {
            Some(ids) if ids.len() == n => {
                original_ids.extend_from_slice(ids);
                IdMapping::Exact
            }
            other => {
                let reason = match other {
                    Some(ids) => FallbackReason::LengthMismatch { len: ids.len() },
                    None => FallbackReason::Missing,
                };
                // Aggregate offset as start keeps fallback ids unique within the set
                let start = tile.original_id_start.unwrap_or(offset as u32);
                warn!(
                    "Tile {} has no usable original ids ({:?}); assuming contiguous range {}..{}",
                    tile.id,
                    reason,
                    start,
                    start as u64 + n as u64
                );
                original_ids.extend((0..n as u32).map(|i| start.wrapping_add(i)));
                IdMapping::Contiguous { start, reason }
            }
        };

        let tile_ids = &original_ids[offset..offset + n];
        for (i, &id) in tile_ids.iter().enumerate() {
            inverse.insert(id, (offset + i) as u32);
        }

        tile_ranges.push(TileIdRange {
            tile: tile.id,
            aggregate_start: offset as u32,
            len: n as u32,
            original_min: tile_ids.iter().copied().min(),
            original_max: tile_ids.iter().copied().max(),
            mapping,
        });
    }

    Ok(SplatSet {
        count,
        positions: Arc::from(positions),
        rotations: Arc::from(rotations),
        scales: Arc::from(scales),
        colors: Arc::from(colors),
        color_layout,
        original_id_by_aggregate: Arc::from(original_ids),
        aggregate_by_original_id: inverse,
        tile_ranges,
        epoch,
    })
}
