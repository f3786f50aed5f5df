// splat_state.rs - Per-splat selection / lock / color-group state
//
// SelectionSets are authoritative; the one-byte-per-splat state table is derived
// from them on demand and uploaded as an R8 texture by the renderer.

use std::collections::{BTreeMap, BTreeSet};

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::splat_set::SplatSet;

/// Splat state bit layout (one u8 per splat)
/// - Bit 0 (0x01): Selected
/// - Bit 1 (0x02): Locked
/// - Bits 2-7: color group id (0-63)
pub mod state_bits {
    pub const NORMAL: u8 = 0;
    pub const SELECTED: u8 = 1;
    pub const LOCKED: u8 = 2;
    pub const GROUP_SHIFT: u8 = 2;
    pub const GROUP_MASK: u8 = 0xFC;
}

/// Default width of the state texture (texels per row)
pub const DEFAULT_STATE_TEXTURE_WIDTH: u32 = 1024;

/// Number of palette slots, group 0 included
pub const COLOR_GROUP_COUNT: usize = 64;

/// Invalid-entry errors kept per mutation batch (the rest are only counted)
pub const MAX_REPORTED_ERRORS: usize = 5;

/// Highlight color group tag, always within [0, 63]
///
/// Group 0 means "no group" and renders with the selected color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ColorGroupId(u8);

impl ColorGroupId {
    pub const NONE: Self = Self(0);
    pub const MAX: u8 = 63;

    /// Exact constructor, None outside [0, 63]
    pub fn new(id: u8) -> Option<Self> {
        (id <= Self::MAX).then_some(Self(id))
    }

    /// Clamp any integer into [0, 63]
    pub fn clamped(id: i32) -> Self {
        Self(id.clamp(0, Self::MAX as i32) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Packed per-splat state byte
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct SplatState(u8);

impl SplatState {
    pub const NORMAL: Self = Self(state_bits::NORMAL);

    pub fn new(selected: bool, locked: bool, group: ColorGroupId) -> Self {
        let mut bits = group.get() << state_bits::GROUP_SHIFT;
        if selected {
            bits |= state_bits::SELECTED;
        }
        if locked {
            bits |= state_bits::LOCKED;
        }
        Self(bits)
    }

    /// Every u8 is a valid state: 2 flag bits + 6 group bits
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_selected(self) -> bool {
        self.0 & state_bits::SELECTED != 0
    }

    pub fn is_locked(self) -> bool {
        self.0 & state_bits::LOCKED != 0
    }

    pub fn color_group(self) -> ColorGroupId {
        ColorGroupId((self.0 & state_bits::GROUP_MASK) >> state_bits::GROUP_SHIFT)
    }
}

/// Integer types accepted as aggregate indices by the mutation API
///
/// Signed inputs exist so that negative indices coming from scripting/UI layers
/// are reported instead of wrapping.
pub trait SplatIndex: Copy {
    fn to_i64(self) -> i64;
}

macro_rules! impl_splat_index {
    ($($t:ty),*) => {
        $(impl SplatIndex for $t {
            fn to_i64(self) -> i64 {
                i64::try_from(self).unwrap_or(i64::MAX)
            }
        })*
    };
}

impl_splat_index!(i32, i64, u32, u64, usize);

/// Outcome of a batch mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReport {
    /// Entries that passed validation and were applied
    pub applied: usize,
    /// Entries rejected by validation
    pub rejected: usize,
    /// First rejected entries (up to MAX_REPORTED_ERRORS)
    pub errors: Vec<ValidationError>,
}

impl MutationReport {
    pub fn is_clean(&self) -> bool {
        self.rejected == 0
    }

    fn reject(&mut self, operation: &str, error: ValidationError) {
        self.rejected += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            warn!("{}: {}", operation, error);
            self.errors.push(error);
        }
    }

    fn finish(self, operation: &str) -> Self {
        if self.rejected > self.errors.len() {
            warn!(
                "{}: {} invalid entries in total ({} not shown)",
                operation,
                self.rejected,
                self.rejected - self.errors.len()
            );
        }
        self
    }

    /// Fold another report into this one (error list stays capped)
    pub fn merge(&mut self, other: MutationReport) {
        self.applied += other.applied;
        self.rejected += other.rejected;
        let room = MAX_REPORTED_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }
}

/// Authoritative interactive state, keyed by aggregate index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSets {
    pub selected: BTreeSet<u32>,
    pub locked: BTreeSet<u32>,
    /// Only non-zero groups are stored
    pub color_groups: BTreeMap<u32, ColorGroupId>,
}

impl SelectionSets {
    pub fn is_selected(&self, index: u32) -> bool {
        self.selected.contains(&index)
    }

    pub fn is_locked(&self, index: u32) -> bool {
        self.locked.contains(&index)
    }

    pub fn color_group(&self, index: u32) -> ColorGroupId {
        self.color_groups.get(&index).copied().unwrap_or_default()
    }

    pub fn state(&self, index: u32) -> SplatState {
        SplatState::new(self.is_selected(index), self.is_locked(index), self.color_group(index))
    }
}

/// Highlight colors for color groups 1..=63
#[derive(Debug, Clone, PartialEq)]
pub struct ColorGroupPalette {
    colors: [Option<Vec4>; COLOR_GROUP_COUNT],
    /// Color of group 0 and of every unset group
    pub selected_color: Vec4,
}

impl Default for ColorGroupPalette {
    fn default() -> Self {
        Self::new(Vec4::new(1.0, 0.0, 1.0, 0.5))
    }
}

impl ColorGroupPalette {
    pub fn new(selected_color: Vec4) -> Self {
        Self {
            colors: [None; COLOR_GROUP_COUNT],
            selected_color,
        }
    }

    /// Assign a color to group 1-63; group 0 is reserved
    pub fn set(&mut self, group: i32, color: Vec4) -> Result<(), ValidationError> {
        if !(1..=ColorGroupId::MAX as i32).contains(&group) {
            return Err(ValidationError::ColorGroupOutOfRange(group));
        }
        self.colors[group as usize] = Some(color);
        Ok(())
    }

    /// Group 0 resolves to the selected color; unset or out-of-range groups to None
    pub fn get(&self, group: i32) -> Option<Vec4> {
        match group {
            0 => Some(self.selected_color),
            1..=63 => self.colors[group as usize],
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.colors = [None; COLOR_GROUP_COUNT];
    }

    /// Uniform array for the shader, unset groups fall back to the selected color
    pub fn uniform_colors(&self) -> [Vec4; COLOR_GROUP_COUNT] {
        let mut out = [self.selected_color; COLOR_GROUP_COUNT];
        for (slot, color) in out.iter_mut().zip(&self.colors).skip(1) {
            if let Some(color) = color {
                *slot = *color;
            }
        }
        out
    }
}

/// Derived one-byte-per-splat state buffer plus the sets it is built from
#[derive(Debug, Clone)]
pub struct SplatStateTable {
    sets: SelectionSets,
    palette: ColorGroupPalette,
    /// Splat count of the current SplatSet; indices are validated against it
    count: usize,
    texture_width: u32,
    states: Vec<SplatState>,
    dirty: bool,
}

impl Default for SplatStateTable {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TEXTURE_WIDTH)
    }
}

impl SplatStateTable {
    pub fn new(texture_width: u32) -> Self {
        Self {
            sets: SelectionSets::default(),
            palette: ColorGroupPalette::default(),
            count: 0,
            texture_width: texture_width.max(1),
            states: Vec::new(),
            dirty: true,
        }
    }

    pub fn with_palette(mut self, palette: ColorGroupPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Adopt the count of a new SplatSet
    ///
    /// The sets are left alone: indices past the new count simply stop
    /// contributing to the table.
    pub fn set_count(&mut self, count: usize) {
        if self.count != count {
            self.count = count;
            self.dirty = true;
        }
    }

    pub fn texture_width(&self) -> u32 {
        self.texture_width
    }

    pub fn set_texture_width(&mut self, width: u32) {
        let width = width.max(1);
        if self.texture_width != width {
            self.texture_width = width;
            self.dirty = true;
        }
    }

    pub fn texture_height(&self) -> u32 {
        (self.count as u64).div_ceil(self.texture_width as u64) as u32
    }

    /// Texels in the backing texture (>= count)
    pub fn capacity(&self) -> usize {
        self.texture_width as usize * self.texture_height() as usize
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn selection_sets(&self) -> &SelectionSets {
        &self.sets
    }

    pub fn selected_count(&self) -> usize {
        self.sets.selected.len()
    }

    pub fn locked_count(&self) -> usize {
        self.sets.locked.len()
    }

    pub fn palette(&self) -> &ColorGroupPalette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut ColorGroupPalette {
        &mut self.palette
    }

    fn validate(&self, index: i64) -> Result<u32, ValidationError> {
        if index < 0 || index as u64 >= self.count as u64 {
            return Err(ValidationError::IndexOutOfRange { index, count: self.count });
        }
        Ok(index as u32)
    }

    fn apply<I, F>(&mut self, operation: &str, indices: impl IntoIterator<Item = I>, mut f: F) -> MutationReport
    where
        I: SplatIndex,
        F: FnMut(&mut SelectionSets, u32),
    {
        let mut report = MutationReport::default();
        for index in indices {
            match self.validate(index.to_i64()) {
                Ok(index) => {
                    f(&mut self.sets, index);
                    report.applied += 1;
                }
                Err(error) => report.reject(operation, error),
            }
        }
        self.dirty = true;
        report.finish(operation)
    }

    /// Select or deselect splats by aggregate index
    pub fn set_selection<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, selected: bool) -> MutationReport {
        self.apply("set_selection", indices, |sets, index| {
            if selected {
                sets.selected.insert(index);
            } else {
                sets.selected.remove(&index);
            }
        })
    }

    /// Lock or unlock splats by aggregate index
    pub fn set_lock<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, locked: bool) -> MutationReport {
        self.apply("set_lock", indices, |sets, index| {
            if locked {
                sets.locked.insert(index);
            } else {
                sets.locked.remove(&index);
            }
        })
    }

    /// Tag splats with a color group (clamped to [0, 63]; 0 removes the tag)
    pub fn set_color_group<I: SplatIndex>(&mut self, indices: impl IntoIterator<Item = I>, group: i32) -> MutationReport {
        let group = ColorGroupId::clamped(group);
        self.apply("set_color_group", indices, |sets, index| {
            if group.is_none() {
                sets.color_groups.remove(&index);
            } else {
                sets.color_groups.insert(index, group);
            }
        })
    }

    fn translate(
        &self,
        operation: &str,
        splats: &SplatSet,
        original_ids: impl IntoIterator<Item = u32>,
    ) -> (Vec<u32>, MutationReport) {
        let mut report = MutationReport::default();
        let mut indices = Vec::new();
        for id in original_ids {
            match splats.aggregate_index(id) {
                Some(index) => indices.push(index as u32),
                None => report.reject(operation, ValidationError::UnmappedOriginalId(id)),
            }
        }
        (indices, report)
    }

    /// Select or deselect splats addressed by their source-dataset id
    pub fn set_selection_by_original_id(
        &mut self,
        splats: &SplatSet,
        original_ids: impl IntoIterator<Item = u32>,
        selected: bool,
    ) -> MutationReport {
        let (indices, mut report) = self.translate("set_selection_by_original_id", splats, original_ids);
        report.merge(self.set_selection(indices, selected));
        report.finish("set_selection_by_original_id")
    }

    /// Lock or unlock splats addressed by their source-dataset id
    pub fn set_lock_by_original_id(
        &mut self,
        splats: &SplatSet,
        original_ids: impl IntoIterator<Item = u32>,
        locked: bool,
    ) -> MutationReport {
        let (indices, mut report) = self.translate("set_lock_by_original_id", splats, original_ids);
        report.merge(self.set_lock(indices, locked));
        report.finish("set_lock_by_original_id")
    }

    pub fn clear_selection(&mut self) {
        self.sets.selected.clear();
        self.dirty = true;
    }

    pub fn clear_locks(&mut self) {
        self.sets.locked.clear();
        self.dirty = true;
    }

    pub fn clear_color_groups(&mut self) {
        self.sets.color_groups.clear();
        self.dirty = true;
    }

    pub fn set_color_group_color(&mut self, group: i32, color: Vec4) -> Result<(), ValidationError> {
        self.palette.set(group, color).inspect_err(|e| warn!("set_color_group_color: {}", e))
    }

    pub fn get_color_group_color(&self, group: i32) -> Option<Vec4> {
        self.palette.get(group)
    }

    /// Regenerate the state bytes if anything changed since the last call
    ///
    /// Returns true when the buffer was rewritten (needs upload).
    pub fn rebuild(&mut self) -> bool {
        if !self.dirty {
            return false;
        }

        let capacity = self.capacity();
        self.states.clear();
        self.states.resize(capacity, SplatState::NORMAL);

        let count = self.count as u32;
        for &index in self.sets.selected.range(..count) {
            self.states[index as usize].0 |= state_bits::SELECTED;
        }
        for &index in self.sets.locked.range(..count) {
            self.states[index as usize].0 |= state_bits::LOCKED;
        }
        for (&index, group) in self.sets.color_groups.range(..count) {
            self.states[index as usize].0 |= group.get() << state_bits::GROUP_SHIFT;
        }

        self.dirty = false;
        debug!(
            "Rebuilt splat state table: {} splats, {}x{} texels, {} selected, {} locked, {} grouped",
            self.count,
            self.texture_width,
            self.texture_height(),
            self.sets.selected.len(),
            self.sets.locked.len(),
            self.sets.color_groups.len()
        );
        true
    }

    /// State buffer as of the last rebuild (length = capacity)
    pub fn states(&self) -> &[SplatState] {
        &self.states
    }

    /// Raw bytes for texture upload
    pub fn state_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.states)
    }

    /// State of one splat as of the last rebuild
    pub fn state(&self, index: usize) -> Option<SplatState> {
        self.states.get(index).copied()
    }
}
