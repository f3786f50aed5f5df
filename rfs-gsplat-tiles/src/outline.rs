// Outline settings for selected Gaussian splats
//
// Two outline techniques consume these settings:
// 1. Mask outline: selected splats are rendered to an alpha mask, an edge
//    detection pass compares the mask against `alpha_cutoff` within
//    `kernel_radius` texels and composites `color` (rendering lives in the GPU layer)
// 2. Ring outline: rings are drawn around the boundary subset computed by
//    `BoundaryClusterer`, whose fallback radius follows `width`
//
// Mode: "centers" compares against a real cutoff (default 0.4), "rings" uses 0.0.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::{debug, warn};

/// Default alpha cutoff of centers mode
pub const CENTERS_ALPHA_CUTOFF: f32 = 0.4;

/// Outline rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutlineMode {
    /// Thinner outline, thresholded at the alpha cutoff
    #[default]
    Centers,
    /// Thicker, continuous outline, alpha cutoff pinned to 0.0
    Rings,
}

impl std::str::FromStr for OutlineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "centers" => Ok(OutlineMode::Centers),
            "rings" => Ok(OutlineMode::Rings),
            other => Err(format!("invalid outline mode: {other} (expected 'centers' or 'rings')")),
        }
    }
}

/// Configuration for outline rendering on selected splats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlineSettings {
    /// Enable outline rendering (default: false)
    pub enabled: bool,

    /// Outline color (RGBA, default: orange, full opacity)
    pub color: Vec4,

    /// Outline width in pixels (>= 0.1, default: 1.5)
    pub width: f32,

    /// Alpha cutoff threshold for edge detection [0, 1] (default: 0.4)
    pub alpha_cutoff: f32,

    pub mode: OutlineMode,

    /// Edge detection kernel radius, 1-4 (default: 2)
    pub kernel_radius: i32,

    /// Minimum alpha difference that counts as an edge [0, 1] (default: 0.5)
    pub min_alpha_diff: f32,

    /// Occlude the outline by scene depth (default: true)
    pub depth_test: bool,

    /// Log every settings change
    pub debug: bool,
}

impl Default for OutlineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Vec4::new(1.0, 0.5, 0.0, 1.0),
            width: 1.5,
            alpha_cutoff: CENTERS_ALPHA_CUTOFF,
            mode: OutlineMode::Centers,
            kernel_radius: 2,
            min_alpha_diff: 0.5,
            depth_test: true,
            debug: false,
        }
    }
}

impl OutlineSettings {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Rings-mode profile
    pub fn rings() -> Self {
        Self {
            enabled: true,
            mode: OutlineMode::Rings,
            alpha_cutoff: 0.0,
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_width(mut self, width: f32) -> Self {
        self.set_width(width);
        self
    }

    pub fn with_kernel_radius(mut self, radius: f32) -> Self {
        self.set_kernel_radius(radius);
        self
    }

    fn log_change(&self, what: &str) {
        if self.debug {
            debug!("Outline {} changed: {:?}", what, self);
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    pub fn set_color(&mut self, color: Vec4) -> bool {
        let changed = self.color != color;
        self.color = color;
        self.log_change("color");
        changed
    }

    pub fn set_width(&mut self, width: f32) -> bool {
        if !width.is_finite() {
            return false;
        }
        let width = width.max(0.1);
        let changed = self.width != width;
        self.width = width;
        self.log_change("width");
        changed
    }

    /// Set the cutoff, optionally together with a mode
    ///
    /// Rings mode forces 0.0; centers mode uses `cutoff` or the 0.4 default.
    pub fn set_alpha_cutoff(&mut self, cutoff: Option<f32>, mode: Option<OutlineMode>) -> bool {
        let before = (self.alpha_cutoff, self.mode);
        match (mode, cutoff) {
            (Some(OutlineMode::Rings), _) => {
                self.alpha_cutoff = 0.0;
                self.mode = OutlineMode::Rings;
            }
            (Some(OutlineMode::Centers), cutoff) => {
                self.alpha_cutoff = cutoff.map_or(CENTERS_ALPHA_CUTOFF, |c| c.clamp(0.0, 1.0));
                self.mode = OutlineMode::Centers;
            }
            (None, Some(cutoff)) => self.alpha_cutoff = cutoff.clamp(0.0, 1.0),
            (None, None) => return false,
        }
        self.log_change("alpha cutoff");
        (self.alpha_cutoff, self.mode) != before
    }

    /// Switch mode; entering centers from rings restores the 0.4 cutoff,
    /// staying in centers keeps a custom cutoff
    pub fn set_mode(&mut self, mode: OutlineMode) -> bool {
        let before = (self.alpha_cutoff, self.mode);
        match mode {
            OutlineMode::Rings => self.alpha_cutoff = 0.0,
            OutlineMode::Centers if self.mode == OutlineMode::Rings => self.alpha_cutoff = CENTERS_ALPHA_CUTOFF,
            OutlineMode::Centers => {}
        }
        self.mode = mode;
        self.log_change("mode");
        (self.alpha_cutoff, self.mode) != before
    }

    /// Parse and set a mode by name; invalid names are ignored with a warning
    pub fn set_mode_str(&mut self, mode: &str) -> bool {
        match mode.parse() {
            Ok(mode) => self.set_mode(mode),
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Rounded, then clamped to [1, 4]
    pub fn set_kernel_radius(&mut self, radius: f32) -> bool {
        if !radius.is_finite() {
            return false;
        }
        let radius = radius.round().clamp(1.0, 4.0) as i32;
        if self.kernel_radius == radius {
            return false;
        }
        self.kernel_radius = radius;
        self.log_change("kernel radius");
        true
    }

    pub fn set_min_alpha_diff(&mut self, diff: f32) -> bool {
        if !diff.is_finite() {
            return false;
        }
        let diff = diff.clamp(0.0, 1.0);
        if self.min_alpha_diff == diff {
            return false;
        }
        self.min_alpha_diff = diff;
        self.log_change("min alpha difference");
        true
    }

    pub fn set_depth_test(&mut self, enabled: bool) -> bool {
        let changed = self.depth_test != enabled;
        self.depth_test = enabled;
        changed
    }
}

/// GPU uniform for the outline shader
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct OutlineParams {
    pub color: Vec4,
    pub width: f32,
    pub alpha_cutoff: f32,
    pub kernel_radius: i32,
    pub min_alpha_diff: f32,
    pub depth_test: u32,
    pub _padding: [u32; 3],
}

impl From<&OutlineSettings> for OutlineParams {
    fn from(settings: &OutlineSettings) -> Self {
        Self {
            color: settings.color,
            width: settings.width,
            alpha_cutoff: settings.alpha_cutoff,
            kernel_radius: settings.kernel_radius,
            min_alpha_diff: settings.min_alpha_diff,
            depth_test: settings.depth_test as u32,
            _padding: [0; 3],
        }
    }
}
