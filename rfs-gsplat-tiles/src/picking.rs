// CPU splat picking against a candidate set
//
// Candidates are projected to window pixels through a caller-supplied
// projector; the closest one within `max_distance` pixels wins. If no
// candidate is close enough on screen, the closest one to the picked world
// position (when the projector can provide it) within `world_max_distance` is used.

use glam::{Mat4, Vec2, Vec3};
use tracing::trace;

use crate::splat_set::SplatSet;
use crate::splat_state::{ColorGroupId, SelectionSets};

/// Maps world positions to window pixels for the current camera
pub trait ScreenProjector {
    /// Window position of `world`, None when it is not visible
    fn world_to_window(&self, world: Vec3) -> Option<Vec2>;

    /// World position under a window pixel (depth pick), if supported
    fn pick_world_position(&self, _window: Vec2) -> Option<Vec3> {
        None
    }
}

impl<F> ScreenProjector for F
where
    F: Fn(Vec3) -> Option<Vec2>,
{
    fn world_to_window(&self, world: Vec3) -> Option<Vec2> {
        self(world)
    }
}

/// Perspective projector from a view-projection matrix and viewport size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjectionProjector {
    pub view_projection: Mat4,
    /// Viewport size in pixels
    pub viewport: Vec2,
    /// Result of a depth pick at the query position, if the host has one
    pub picked_world_position: Option<Vec3>,
}

impl ViewProjectionProjector {
    pub fn new(view_projection: Mat4, viewport: Vec2) -> Self {
        Self {
            view_projection,
            viewport,
            picked_world_position: None,
        }
    }

    pub fn with_picked_world_position(mut self, position: Vec3) -> Self {
        self.picked_world_position = Some(position);
        self
    }
}

impl ScreenProjector for ViewProjectionProjector {
    fn world_to_window(&self, world: Vec3) -> Option<Vec2> {
        let clip = self.view_projection * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        // Window origin is top-left, y down
        Some(Vec2::new(
            (ndc.x + 1.0) * 0.5 * self.viewport.x,
            (1.0 - ndc.y) * 0.5 * self.viewport.y,
        ))
    }

    fn pick_world_position(&self, _window: Vec2) -> Option<Vec3> {
        self.picked_world_position
    }
}

/// Picking options
#[derive(Debug, Clone, PartialEq)]
pub struct PickOptions {
    /// Screen-space search radius in pixels (default: 40)
    pub max_distance: f32,
    /// World-space search radius for the depth-pick fallback (default: 0.05)
    pub world_max_distance: f32,
    /// Search only the current selection when it is non-empty (default: true)
    pub search_selected_only: bool,
    /// Explicit candidates, used when the selection is not searched
    pub indices: Option<Vec<u32>>,
}

impl Default for PickOptions {
    fn default() -> Self {
        Self {
            max_distance: 40.0,
            world_max_distance: 0.05,
            search_selected_only: true,
            indices: None,
        }
    }
}

impl PickOptions {
    pub fn with_max_distance(mut self, pixels: f32) -> Self {
        self.max_distance = pixels;
        self
    }

    pub fn with_world_max_distance(mut self, distance: f32) -> Self {
        self.world_max_distance = distance;
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn search_all(mut self) -> Self {
        self.search_selected_only = false;
        self
    }
}

/// Picked splat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatInfo {
    pub aggregate_index: u32,
    pub original_id: Option<u32>,
    pub color_group: ColorGroupId,
    pub is_selected: bool,
    pub is_locked: bool,
    /// Pixel distance of the hit; world distance when the depth-pick fallback won
    pub pixel_distance: f32,
}

/// Find the candidate splat closest to `window_position`
///
/// `root_to_world` maps SplatSet positions to world space (model * root).
pub fn pick_splat(
    splats: &SplatSet,
    sets: &SelectionSets,
    projector: &dyn ScreenProjector,
    window_position: Vec2,
    options: &PickOptions,
    root_to_world: Mat4,
) -> Option<SplatInfo> {
    if splats.is_empty() {
        return None;
    }

    let candidates: Vec<u32> = if options.search_selected_only && !sets.selected.is_empty() {
        sets.selected.iter().copied().collect()
    } else if let Some(indices) = options.indices.as_ref().filter(|i| !i.is_empty()) {
        indices.clone()
    } else {
        // No full-dataset scan
        return None;
    };

    let picked_world = projector.pick_world_position(window_position);

    let mut closest: Option<(u32, f32)> = None;
    let mut closest_distance = options.max_distance;
    let mut closest_world: Option<(u32, f32)> = None;
    let mut closest_world_distance = options.world_max_distance;
    let mut projected = 0usize;

    for index in candidates {
        let Some(position) = splats.position(index as usize) else {
            continue;
        };
        let world = root_to_world.transform_point3(position);

        let Some(window) = projector.world_to_window(world) else {
            continue;
        };
        projected += 1;

        let distance = window.distance(window_position);
        if distance <= closest_distance {
            closest_distance = distance;
            closest = Some((index, distance));
        }

        if let Some(picked) = picked_world {
            let world_distance = picked.distance(world);
            if world_distance <= closest_world_distance {
                closest_world_distance = world_distance;
                closest_world = Some((index, world_distance));
            }
        }
    }

    let Some((index, distance)) = closest.or(closest_world) else {
        trace!("Pick at {:?}: no splat in range ({} candidates projected)", window_position, projected);
        return None;
    };

    Some(SplatInfo {
        aggregate_index: index,
        original_id: splats.original_id(index as usize),
        color_group: sets.color_group(index),
        is_selected: sets.is_selected(index),
        is_locked: sets.is_locked(index),
        pixel_distance: distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splat_set::{TileId, TileSplats};
    use crate::tile_aggregator::aggregate;

    #[test]
    fn projector_maps_ndc_to_top_left_window() {
        let projector = ViewProjectionProjector::new(Mat4::IDENTITY, Vec2::new(800.0, 600.0));
        assert_eq!(projector.world_to_window(Vec3::ZERO), Some(Vec2::new(400.0, 300.0)));
        assert_eq!(projector.world_to_window(Vec3::new(-1.0, 1.0, 0.0)), Some(Vec2::new(0.0, 0.0)));
    }

    #[test]
    fn depth_pick_is_used_when_no_pixel_is_close() {
        let positions = [0.0, 0.0, 0.0, 0.5, 0.0, 0.0];
        let rotations = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let scales = [0.1; 6];
        let colors = [255u8; 8];
        let tile = TileSplats::new(TileId(1), &positions, &rotations, &scales, &colors);
        let splats = aggregate(&[tile], 1).unwrap();

        let mut sets = SelectionSets::default();
        sets.selected.extend([0, 1]);

        // Everything projects far from the query point
        let projector = ViewProjectionProjector::new(Mat4::IDENTITY, Vec2::new(100.0, 100.0))
            .with_picked_world_position(Vec3::new(0.51, 0.0, 0.0));
        let info = pick_splat(&splats, &sets, &projector, Vec2::new(1000.0, 1000.0), &PickOptions::default(), Mat4::IDENTITY)
            .expect("world fallback hit");
        assert_eq!(info.aggregate_index, 1);
        assert!(info.pixel_distance < 0.05);
    }
}
