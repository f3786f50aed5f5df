// Gaussian splat primitive: per-frame orchestration of tiled splat data
//
// Frame order (explicit composition, the host calls `update` once per frame):
//   1. aggregate the selected tiles (rebuild only when the tile list changed)
//   2. drive attribute encoding for the current aggregation epoch
//   3. rebuild the state table if selection/lock/group state changed
//   4. drive the depth sort (only once the epoch is encoded)
//   5. adopt a finished sort as the draw order
//
// Interactive mutations (selection, locks, color groups) only dirty derived
// state; nothing is recomputed until the next frame or query needs it.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec4};
use tracing::{debug, error, info, warn};

use crate::boundary::{BoundaryClusterer, BoundaryParameterUpdate, BoundaryParameters, BoundaryStats};
use crate::color_filter::{ColorFilter, ColorFilterPipeline, ColorModifications, ColorOverride, FilterId};
use crate::config::PrimitiveConfig;
use crate::encoder::CpuSplatEncoder;
use crate::error::{EncodingError, PrimitiveError, ValidationError};
use crate::outline::{OutlineParams, OutlineSettings};
use crate::picking::{pick_splat, PickOptions, ScreenProjector, SplatInfo};
use crate::radix_sort::CpuDepthSorter;
use crate::services::{DepthSortService, EncodeRequest, EncodedSplats, SplatEncodingService};
use crate::sort_scheduler::{SortScheduler, SortStats, SortingState};
use crate::splat_set::{SplatSet, TileSplats};
use crate::splat_state::{ColorGroupPalette, MutationReport, SplatIndex, SplatState, SplatStateTable, COLOR_GROUP_COUNT};
use crate::task::Task;
use crate::tile_aggregator::TileAggregator;

/// Camera/model input of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub view_matrix: Mat4,
    /// Tileset model matrix (world placement of the root)
    pub model_matrix: Mat4,
}

impl FrameInput {
    pub fn new(view_matrix: Mat4) -> Self {
        Self {
            view_matrix,
            model_matrix: Mat4::IDENTITY,
        }
    }

    pub fn with_model_matrix(mut self, model_matrix: Mat4) -> Self {
        self.model_matrix = model_matrix;
        self
    }
}

/// How far the primitive got this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// No splats aggregated yet
    Empty,
    /// Waiting for the encoder to deliver the current epoch
    Encoding,
    /// Encoding of the current epoch failed; waiting for a trigger to retry
    EncodingFailed,
    /// Encoded; a draw order is available
    Ready,
}

/// Per-frame summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutput {
    pub stage: FrameStage,
    /// The SplatSet was rebuilt this frame
    pub aggregated: bool,
    /// A new encoded texture arrived this frame
    pub encoded: bool,
    /// The state bytes were regenerated this frame (needs upload)
    pub state_rebuilt: bool,
    /// A new sorted draw order was adopted this frame
    pub draw_order_updated: bool,
    pub sort_state: SortingState,
}

impl FrameOutput {
    fn new(stage: FrameStage, sort_state: SortingState) -> Self {
        Self {
            stage,
            aggregated: false,
            encoded: false,
            state_rebuilt: false,
            draw_order_updated: false,
            sort_state,
        }
    }
}

enum EncodingState {
    /// Submit on the next frame
    Needed,
    Pending {
        task: Task<EncodedSplats>,
        epoch: u64,
        /// `once` filters baked into this request
        once_filters: Vec<FilterId>,
    },
    Done,
    /// Last request rejected; resubmitted only after a trigger
    Failed(EncodingError),
}

/// Tiled Gaussian splat primitive (CPU side)
pub struct GaussianSplatPrimitive {
    config: PrimitiveConfig,
    sorter: Arc<dyn DepthSortService>,
    encoder: Arc<dyn SplatEncodingService>,

    aggregator: TileAggregator,
    splats: SplatSet,
    state_table: SplatStateTable,
    boundary: BoundaryClusterer,
    scheduler: SortScheduler,

    encoding: EncodingState,
    /// A color trigger arrived while an encode was in flight
    reencode_requested: bool,
    encoded: Option<EncodedSplats>,
    /// Epoch of `encoded`
    encoded_epoch: Option<u64>,
    draw_order: Option<Vec<u32>>,

    modifications: ColorModifications,
    filters: ColorFilterPipeline,
    outline: OutlineSettings,
    model_matrix: Mat4,
}

impl std::fmt::Debug for GaussianSplatPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaussianSplatPrimitive")
            .field("splats", &self.splats.len())
            .field("epoch", &self.splats.epoch())
            .field("scheduler", &self.scheduler)
            .field("encoded_epoch", &self.encoded_epoch)
            .finish_non_exhaustive()
    }
}

impl GaussianSplatPrimitive {
    pub fn new(
        config: PrimitiveConfig,
        sorter: Arc<dyn DepthSortService>,
        encoder: Arc<dyn SplatEncodingService>,
    ) -> Self {
        let palette = ColorGroupPalette::new(config.selected_color);
        let mut boundary = BoundaryClusterer::new(config.boundary);
        boundary.set_outline_width(config.outline.width);

        Self {
            sorter,
            encoder,
            aggregator: TileAggregator::new(),
            splats: SplatSet::default(),
            state_table: SplatStateTable::new(config.state_texture_width).with_palette(palette),
            boundary,
            scheduler: SortScheduler::new(),
            encoding: EncodingState::Needed,
            reencode_requested: false,
            encoded: None,
            encoded_epoch: None,
            draw_order: None,
            modifications: ColorModifications::default(),
            filters: ColorFilterPipeline::default(),
            outline: config.outline,
            model_matrix: Mat4::IDENTITY,
            config,
        }
    }

    /// Primitive backed by the CPU reference sorter and encoder
    pub fn with_cpu_services(config: PrimitiveConfig) -> Self {
        Self::new(config, Arc::new(CpuDepthSorter::default()), Arc::new(CpuSplatEncoder::default()))
    }

    /// Run one frame of the pipeline
    ///
    /// Never blocks on the sort/encode services. Aggregation, encoding and
    /// sort failures are returned as errors; a sort failure is returned again
    /// on every frame until `clear_sort_error`.
    pub fn update(&mut self, frame: &FrameInput, tiles: &[TileSplats<'_>]) -> Result<FrameOutput, PrimitiveError> {
        if frame.model_matrix != self.model_matrix {
            self.model_matrix = frame.model_matrix;
            self.scheduler.mark_dirty();
        }

        let aggregated = match self.aggregator.update(tiles) {
            Ok(Some(splats)) => {
                self.install(splats);
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("Tile aggregation failed: {}", e);
                return Err(e.into());
            }
        };

        if self.splats.is_empty() {
            let mut output = FrameOutput::new(FrameStage::Empty, self.scheduler.state());
            output.aggregated = aggregated;
            return Ok(output);
        }

        let encoded = self.drive_encoding()?;
        let current = self.encoded_epoch == Some(self.splats.epoch());
        let stage = match (&self.encoding, current) {
            (_, true) => FrameStage::Ready,
            (EncodingState::Failed(_), false) => FrameStage::EncodingFailed,
            _ => FrameStage::Encoding,
        };

        let mut output = FrameOutput::new(stage, self.scheduler.state());
        output.aggregated = aggregated;
        output.encoded = encoded;
        if !current {
            return Ok(output);
        }

        output.state_rebuilt = self.state_table.rebuild();

        let model_view = frame.view_matrix * self.config.root_transform;
        output.sort_state = self.scheduler.update(self.sorter.as_ref(), &self.splats, model_view)?;

        if let Some(sorted) = self.scheduler.take_sorted() {
            self.draw_order = Some(sorted.order);
            output.draw_order_updated = true;
            output.sort_state = self.scheduler.state();
        }

        Ok(output)
    }

    fn install(&mut self, splats: SplatSet) {
        info!(
            "Splat set rebuilt: {} splats from {} tiles (epoch {})",
            splats.len(),
            splats.tile_ranges().len(),
            splats.epoch()
        );
        self.state_table.set_count(splats.len());
        self.splats = splats;
        self.boundary.mark_dirty();
        self.scheduler.mark_dirty();
        self.encoding = EncodingState::Needed;
        self.reencode_requested = false;
        self.draw_order = None;
    }

    /// Request for the current colors, plus the `once` filters it bakes in
    ///
    /// Nothing is consumed here; the encoder may still refuse the request.
    fn encode_request(&self) -> (EncodeRequest, Vec<FilterId>) {
        let request = EncodeRequest::new(&self.splats);
        if self.modifications.is_empty() && !self.filters.has_active() {
            return (request, Vec::new());
        }

        let mut colors = self.splats.colors().to_vec();
        let layout = self.splats.color_layout();
        self.modifications.apply(&mut colors, layout, &self.splats);
        self.filters.apply(&mut colors, layout, &self.splats);
        (request.with_colors(Arc::from(colors)), self.filters.active_once())
    }

    /// Returns true when a result for the current epoch arrived this frame
    fn drive_encoding(&mut self) -> Result<bool, EncodingError> {
        let epoch = self.splats.epoch();

        if let EncodingState::Needed = self.encoding {
            let (request, once_filters) = self.encode_request();
            match self.encoder.submit(request) {
                Some(task) => {
                    debug!("Splat encoding requested for epoch {}", epoch);
                    self.reencode_requested = false;
                    self.encoding = EncodingState::Pending {
                        task,
                        epoch,
                        once_filters,
                    };
                }
                None => {
                    debug!("Splat encoder busy, retrying next frame");
                    return Ok(false);
                }
            }
        }

        let EncodingState::Pending {
            task,
            epoch: pending_epoch,
            once_filters,
        } = &mut self.encoding
        else {
            return Ok(false);
        };
        let pending_epoch = *pending_epoch;
        let Some(result) = task.poll() else {
            return Ok(false);
        };
        let once_filters = std::mem::take(once_filters);

        if pending_epoch != epoch {
            warn!("Discarding splat encoding for epoch {} (current epoch {})", pending_epoch, epoch);
            self.encoding = EncodingState::Needed;
            return Ok(false);
        }

        let result = result
            .map_err(|source| EncodingError::Rejected { epoch, source })
            .and_then(|encoded| check_dimensions(encoded, self.splats.len()));

        match result {
            Ok(encoded) => {
                debug!("Splat encoding ready: {}x{} texels (epoch {})", encoded.width, encoded.height, epoch);
                self.state_table.set_texture_width(encoded.width);
                self.encoded = Some(encoded);
                if self.encoded_epoch != Some(epoch) {
                    self.encoded_epoch = Some(epoch);
                    self.draw_order = Some((0..self.splats.len() as u32).collect());
                }
                let consumed = self.filters.consume_once(&once_filters);
                if consumed > 0 {
                    debug!("{} once color filters delivered and disabled", consumed);
                }
                self.encoding = if std::mem::take(&mut self.reencode_requested) {
                    debug!("Colors changed during encoding, re-encoding epoch {}", epoch);
                    EncodingState::Needed
                } else {
                    EncodingState::Done
                };
                Ok(true)
            }
            Err(e) => {
                error!("Splat encoding failed: {}", e);
                self.encoding = if std::mem::take(&mut self.reencode_requested) {
                    EncodingState::Needed
                } else {
                    EncodingState::Failed(e.clone())
                };
                Err(e)
            }
        }
    }

    /// Color trigger: re-encode now, or right after the in-flight encode lands
    fn request_encoding(&mut self) {
        if matches!(self.encoding, EncodingState::Pending { .. }) {
            self.reencode_requested = true;
        } else {
            self.encoding = EncodingState::Needed;
        }
    }

    // ---------------------------------------------------------------------
    // Selection / lock / color groups
    // ---------------------------------------------------------------------

    pub fn set_splat_selection<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, selected: bool) -> MutationReport {
        self.boundary.mark_dirty();
        self.state_table.set_selection(indices, selected)
    }

    pub fn set_splat_lock<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, locked: bool) -> MutationReport {
        self.state_table.set_lock(indices, locked)
    }

    /// Group is clamped to [0, 63]; 0 removes the group
    pub fn set_splat_color_group<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, group: i32) -> MutationReport {
        self.state_table.set_color_group(indices, group)
    }

    pub fn set_splat_selection_by_original_id(
        &mut self,
        original_ids: impl IntoIterator<Item = u32>,
        selected: bool,
    ) -> MutationReport {
        self.boundary.mark_dirty();
        self.state_table
            .set_selection_by_original_id(&self.splats, original_ids, selected)
    }

    pub fn set_splat_lock_by_original_id(&mut self, original_ids: impl IntoIterator<Item = u32>, locked: bool) -> MutationReport {
        self.state_table.set_lock_by_original_id(&self.splats, original_ids, locked)
    }

    pub fn clear_selection(&mut self) {
        self.boundary.mark_dirty();
        self.state_table.clear_selection();
    }

    pub fn clear_locks(&mut self) {
        self.state_table.clear_locks();
    }

    pub fn clear_color_groups(&mut self) {
        self.state_table.clear_color_groups();
    }

    /// Color of group 1-63
    pub fn set_color_group_color(&mut self, group: i32, color: Vec4) -> Result<(), ValidationError> {
        self.state_table.set_color_group_color(group, color)
    }

    /// Group 0 always resolves to the selected color
    pub fn get_color_group_color(&self, group: i32) -> Option<Vec4> {
        self.state_table.get_color_group_color(group)
    }

    /// Uniform array of all 64 group colors
    pub fn color_group_colors(&self) -> [Vec4; COLOR_GROUP_COUNT] {
        self.state_table.palette().uniform_colors()
    }

    pub fn selected_color(&self) -> Vec4 {
        self.state_table.palette().selected_color
    }

    pub fn set_selected_color(&mut self, color: Vec4) {
        self.state_table.palette_mut().selected_color = color;
        self.config.selected_color = color;
    }

    pub fn locked_color(&self) -> Vec4 {
        self.config.locked_color
    }

    pub fn set_locked_color(&mut self, color: Vec4) {
        self.config.locked_color = color;
    }

    pub fn selected_count(&self) -> usize {
        self.state_table.selected_count()
    }

    pub fn locked_count(&self) -> usize {
        self.state_table.locked_count()
    }

    // ---------------------------------------------------------------------
    // Outline
    // ---------------------------------------------------------------------

    /// Returns true if a parameter changed (the boundary is then recomputed lazily)
    pub fn set_outline_boundary_parameters(&mut self, update: BoundaryParameterUpdate) -> bool {
        let changed = self.boundary.set_parameters(update);
        if changed {
            self.config.boundary = *self.boundary.parameters();
        }
        changed
    }

    pub fn outline_boundary_parameters(&self) -> &BoundaryParameters {
        self.boundary.parameters()
    }

    pub fn outline_boundary_stats(&mut self) -> BoundaryStats {
        self.boundary.set_outline_width(self.outline.width);
        self.boundary.stats(&self.state_table.selection_sets().selected, &self.splats)
    }

    /// Aggregate indices to draw rings around
    pub fn outline_boundary_indices(&mut self) -> &[u32] {
        self.boundary.set_outline_width(self.outline.width);
        self.boundary.indices(&self.state_table.selection_sets().selected, &self.splats)
    }

    pub fn outline(&self) -> &OutlineSettings {
        &self.outline
    }

    pub fn outline_mut(&mut self) -> &mut OutlineSettings {
        &mut self.outline
    }

    pub fn outline_params(&self) -> OutlineParams {
        OutlineParams::from(&self.outline)
    }

    // ---------------------------------------------------------------------
    // Color pipeline
    // ---------------------------------------------------------------------

    /// Override the color of a source point (re-encodes)
    pub fn set_color_modification(&mut self, original_id: u32, color: impl Into<ColorOverride>) {
        self.modifications.set(original_id, color);
        self.request_encoding();
    }

    pub fn remove_color_modification(&mut self, original_id: u32) -> bool {
        let removed = self.modifications.remove(original_id);
        if removed {
            self.request_encoding();
        }
        removed
    }

    pub fn clear_color_modifications(&mut self) {
        if !self.modifications.is_empty() {
            self.modifications.clear();
            self.request_encoding();
        }
    }

    pub fn color_modifications(&self) -> &ColorModifications {
        &self.modifications
    }

    pub fn add_color_filter(&mut self, filter: ColorFilter) -> FilterId {
        let id = self.filters.add(filter);
        self.request_encoding();
        id
    }

    pub fn remove_color_filter(&mut self, id: FilterId) -> bool {
        let removed = self.filters.remove(id);
        if removed {
            self.request_encoding();
        }
        removed
    }

    pub fn set_color_filter_enabled(&mut self, id: FilterId, enabled: bool) -> bool {
        let found = self.filters.set_enabled(id, enabled);
        if found {
            self.request_encoding();
        }
        found
    }

    pub fn clear_color_filters(&mut self) {
        if !self.filters.is_empty() {
            self.filters.clear();
            self.request_encoding();
        }
    }

    pub fn color_filters(&self) -> &ColorFilterPipeline {
        &self.filters
    }

    // ---------------------------------------------------------------------
    // Picking
    // ---------------------------------------------------------------------

    /// Closest candidate splat to a window position (configured options if None)
    pub fn get_splat_info_at_screen_position(
        &self,
        projector: &dyn ScreenProjector,
        window_position: Vec2,
        options: Option<&PickOptions>,
    ) -> Option<SplatInfo> {
        let options = options.unwrap_or(&self.config.pick);
        pick_splat(
            &self.splats,
            self.state_table.selection_sets(),
            projector,
            window_position,
            options,
            self.model_matrix * self.config.root_transform,
        )
    }

    // ---------------------------------------------------------------------
    // Recovery
    // ---------------------------------------------------------------------

    /// Leave the sort Error state; the next frame re-sorts
    pub fn clear_sort_error(&mut self) {
        self.scheduler.clear_error();
    }

    /// Resubmit encoding after a failure
    pub fn retry_encoding(&mut self) {
        if matches!(self.encoding, EncodingState::Failed(_)) {
            self.encoding = EncodingState::Needed;
        }
    }

    /// Force a re-sort on the next frame
    pub fn mark_dirty(&mut self) {
        self.scheduler.mark_dirty();
    }

    /// Force re-aggregation on the next frame
    pub fn invalidate_tiles(&mut self) {
        self.aggregator.invalidate();
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &PrimitiveConfig {
        &self.config
    }

    pub fn splats(&self) -> &SplatSet {
        &self.splats
    }

    pub fn num_splats(&self) -> usize {
        self.splats.len()
    }

    pub fn state_table(&self) -> &SplatStateTable {
        &self.state_table
    }

    /// State texture bytes as of the last rebuild
    pub fn state_bytes(&self) -> &[u8] {
        self.state_table.state_bytes()
    }

    pub fn splat_state(&self, index: usize) -> Option<SplatState> {
        self.state_table.state(index)
    }

    /// Back-to-front draw order (identity until the first sort of an epoch)
    pub fn draw_order(&self) -> Option<&[u32]> {
        self.draw_order.as_deref()
    }

    pub fn encoded_splats(&self) -> Option<&EncodedSplats> {
        self.encoded.as_ref()
    }

    pub fn encoding_error(&self) -> Option<&EncodingError> {
        match &self.encoding {
            EncodingState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_encoding_pending(&self) -> bool {
        matches!(self.encoding, EncodingState::Pending { .. })
    }

    pub fn sort_state(&self) -> SortingState {
        self.scheduler.state()
    }

    pub fn sort_stats(&self) -> &SortStats {
        self.scheduler.stats()
    }
}

fn check_dimensions(encoded: EncodedSplats, count: usize) -> Result<EncodedSplats, EncodingError> {
    if count > 0 && (encoded.width == 0 || encoded.height == 0 || encoded.data.is_empty()) {
        return Err(EncodingError::Dimensions {
            width: encoded.width,
            height: encoded.height,
            count,
        });
    }
    Ok(encoded)
}
