// Color processing applied to splat colors before encoding
//
// Two stages, in order:
//   1. ColorModifications: fixed per-original-id color overrides
//   2. ColorFilterPipeline: user callbacks run per splat in priority order
//
// Both run on a copy of the aggregate colors; the SplatSet itself is never
// modified.

use std::collections::BTreeMap;
use std::fmt;

use glam::Vec3;
use tracing::debug;

use crate::splat_set::{ColorLayout, SplatSet};

#[inline]
fn clamp_byte(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Replacement color for one source point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorOverride {
    pub rgb: [u8; 3],
    /// Only written for RGBA data
    pub alpha: Option<u8>,
}

impl From<[u8; 3]> for ColorOverride {
    fn from(rgb: [u8; 3]) -> Self {
        Self { rgb, alpha: None }
    }
}

impl From<[u8; 4]> for ColorOverride {
    fn from(c: [u8; 4]) -> Self {
        Self {
            rgb: [c[0], c[1], c[2]],
            alpha: Some(c[3]),
        }
    }
}

/// Per-original-id color overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorModifications {
    by_original_id: BTreeMap<u32, ColorOverride>,
}

impl ColorModifications {
    pub fn set(&mut self, original_id: u32, color: impl Into<ColorOverride>) {
        self.by_original_id.insert(original_id, color.into());
    }

    pub fn remove(&mut self, original_id: u32) -> bool {
        self.by_original_id.remove(&original_id).is_some()
    }

    pub fn clear(&mut self) {
        self.by_original_id.clear();
    }

    pub fn get(&self, original_id: u32) -> Option<&ColorOverride> {
        self.by_original_id.get(&original_id)
    }

    pub fn len(&self) -> usize {
        self.by_original_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_original_id.is_empty()
    }

    /// Overwrite the colors of every splat whose original id has an override
    ///
    /// Returns the number of splats recolored.
    pub fn apply(&self, colors: &mut [u8], layout: ColorLayout, splats: &SplatSet) -> usize {
        if self.is_empty() {
            return 0;
        }

        let components = layout.components();
        let mut applied = 0;
        for (i, &id) in splats.original_id_by_aggregate().iter().enumerate() {
            let Some(color) = self.by_original_id.get(&id) else {
                continue;
            };
            let Some(c) = colors.get_mut(i * components..(i + 1) * components) else {
                break;
            };
            c[..3].copy_from_slice(&color.rgb);
            if let (ColorLayout::Rgba, Some(alpha)) = (layout, color.alpha) {
                c[3] = alpha;
            }
            applied += 1;
        }

        debug!("Color modifications applied to {} splats ({} overrides)", applied, self.len());
        applied
    }
}

/// What a filter sees for one splat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterContext {
    pub aggregate_index: usize,
    pub original_id: u32,
    pub position: Vec3,
    /// Current color, including changes by earlier filters
    pub rgba: [u8; 4],
}

/// Changes a filter requests for one splat; every field is optional
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterResult {
    /// Make the splat fully transparent and stop processing
    pub discard: bool,
    /// Alpha override: values <= 1.0 are normalized, larger values are bytes
    pub alpha: Option<f32>,
    /// Scale RGB by this factor
    pub multiply: Option<f32>,
    /// Replace the color (alpha kept if overridden)
    pub rgba: Option<[u8; 4]>,
    /// Replace the color, or tint towards it when `filter_strength` is set
    pub color: Option<[u8; 4]>,
    /// Blend weight for `color` [0, 1]
    pub filter_strength: Option<f32>,
    /// Blend towards white [0, 1]
    pub tint: Option<f32>,
    /// Stop (or keep) processing later filters; defaults to `discard`
    pub stop: Option<bool>,
}

impl FilterResult {
    pub fn discard() -> Self {
        Self {
            discard: true,
            ..Default::default()
        }
    }

    pub fn alpha(alpha: f32) -> Self {
        Self {
            alpha: Some(alpha),
            ..Default::default()
        }
    }

    pub fn multiply(factor: f32) -> Self {
        Self {
            multiply: Some(factor),
            ..Default::default()
        }
    }

    pub fn rgba(rgba: [u8; 4]) -> Self {
        Self {
            rgba: Some(rgba),
            ..Default::default()
        }
    }

    pub fn color(color: [u8; 4]) -> Self {
        Self {
            color: Some(color),
            ..Default::default()
        }
    }

    pub fn tint(tint: f32) -> Self {
        Self {
            tint: Some(tint),
            ..Default::default()
        }
    }

    pub fn with_filter_strength(mut self, strength: f32) -> Self {
        self.filter_strength = Some(strength);
        self
    }

    pub fn with_stop(mut self, stop: bool) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Apply to `rgba`; returns true if later filters must be skipped
    fn apply(&self, rgba: &mut [u8; 4]) -> bool {
        let mut stop = false;
        let mut alpha_override = None;

        if self.discard {
            rgba[3] = 0;
            stop = true;
        }

        if let Some(alpha) = self.alpha {
            let alpha = clamp_byte(if alpha > 1.0 { alpha } else { alpha * 255.0 });
            rgba[3] = alpha;
            alpha_override = Some(alpha);
        }

        if let Some(factor) = self.multiply {
            for c in &mut rgba[..3] {
                *c = clamp_byte(*c as f32 * factor);
            }
        }

        if let Some(replacement) = self.rgba {
            *rgba = replacement;
            if let Some(alpha) = alpha_override {
                rgba[3] = alpha;
            }
        }

        if let Some(color) = self.color {
            match self.filter_strength {
                Some(strength) => {
                    let strength = strength.clamp(0.0, 1.0);
                    for k in 0..3 {
                        let original = rgba[k] as f32;
                        let filtered = original * (0.5 + color[k] as f32 / 255.0 * 0.9);
                        rgba[k] = clamp_byte(original * (1.0 - strength) + filtered * strength);
                    }
                }
                None => rgba[..3].copy_from_slice(&color[..3]),
            }
            rgba[3] = alpha_override.unwrap_or(color[3]);
        }

        if let Some(tint) = self.tint {
            let tint = tint.clamp(0.0, 1.0);
            for c in &mut rgba[..3] {
                *c = clamp_byte(*c as f32 * (1.0 - tint) + 255.0 * tint);
            }
        }

        self.stop.unwrap_or(stop)
    }
}

pub type FilterFn = Box<dyn Fn(&FilterContext) -> Option<FilterResult> + Send + Sync>;

/// Handle returned by [`ColorFilterPipeline::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u64);

/// One user color filter
pub struct ColorFilter {
    pub name: String,
    /// Lower runs first
    pub priority: i32,
    pub enabled: bool,
    /// Disable after the next encoding pass
    pub once: bool,
    callback: FilterFn,
}

impl fmt::Debug for ColorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorFilter")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

impl ColorFilter {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&FilterContext) -> Option<FilterResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            enabled: true,
            once: false,
            callback: Box::new(callback),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Ordered set of color filters
#[derive(Debug, Default)]
pub struct ColorFilterPipeline {
    filters: Vec<(FilterId, ColorFilter)>,
    next_id: u64,
}

impl ColorFilterPipeline {
    pub fn add(&mut self, filter: ColorFilter) -> FilterId {
        let id = FilterId(self.next_id);
        self.next_id += 1;
        self.filters.push((id, filter));
        // Stable: equal priorities keep insertion order
        self.filters.sort_by_key(|(_, f)| f.priority);
        id
    }

    pub fn remove(&mut self, id: FilterId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|(fid, _)| *fid != id);
        self.filters.len() != before
    }

    pub fn set_enabled(&mut self, id: FilterId, enabled: bool) -> bool {
        match self.filters.iter_mut().find(|(fid, _)| *fid == id) {
            Some((_, filter)) => {
                filter.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: FilterId) -> Option<&ColorFilter> {
        self.filters.iter().find(|(fid, _)| *fid == id).map(|(_, f)| f)
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn has_active(&self) -> bool {
        self.filters.iter().any(|(_, f)| f.enabled)
    }

    /// Enabled `once` filters, as they would take part in the next [`Self::apply`]
    pub fn active_once(&self) -> Vec<FilterId> {
        self.filters
            .iter()
            .filter(|(_, f)| f.enabled && f.once)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Disable the given `once` filters after their pass has been delivered
    pub fn consume_once(&mut self, ids: &[FilterId]) -> usize {
        let mut consumed = 0;
        for (id, filter) in self.filters.iter_mut() {
            if filter.once && filter.enabled && ids.contains(id) {
                filter.enabled = false;
                consumed += 1;
            }
        }
        consumed
    }

    /// Run enabled filters over every splat; returns the number of splats changed
    ///
    /// `once` filters stay enabled; see [`Self::consume_once`].
    pub fn apply(&self, colors: &mut [u8], layout: ColorLayout, splats: &SplatSet) -> usize {
        let active: Vec<usize> = (0..self.filters.len()).filter(|&k| self.filters[k].1.enabled).collect();
        if active.is_empty() {
            return 0;
        }

        let components = layout.components();
        let mut changed = 0;
        for i in 0..splats.len() {
            let Some(c) = colors.get_mut(i * components..(i + 1) * components) else {
                break;
            };
            let mut rgba = [c[0], c[1], c[2], if components == 4 { c[3] } else { 255 }];
            let original = rgba;

            for &k in &active {
                let context = FilterContext {
                    aggregate_index: i,
                    original_id: splats.original_id(i).unwrap_or(i as u32),
                    position: splats.position(i).unwrap_or(Vec3::ZERO),
                    rgba,
                };
                let Some(result) = (self.filters[k].1.callback)(&context) else {
                    continue;
                };
                if result.apply(&mut rgba) {
                    break;
                }
            }

            if rgba != original {
                c[..3].copy_from_slice(&rgba[..3]);
                if components == 4 {
                    c[3] = rgba[3];
                }
                changed += 1;
            }
        }

        debug!("Color filters ({} active) changed {} splats", active.len(), changed);
        changed
    }
}
