// Primitive configuration

use glam::{Mat4, Vec4};

use crate::boundary::BoundaryParameters;
use crate::outline::OutlineSettings;
use crate::picking::PickOptions;
use crate::splat_state::DEFAULT_STATE_TEXTURE_WIDTH;

/// Configuration for a GaussianSplatPrimitive
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveConfig {
    /// Highlight color of selected splats and of color group 0
    /// Default: magenta, 50% alpha
    pub selected_color: Vec4,

    /// Highlight color of locked splats
    /// Default: grey, 30% alpha
    pub locked_color: Vec4,

    /// Width of the state texture until an encoded texture provides one
    /// Default: 1024
    pub state_texture_width: u32,

    /// Transform of the tileset root; positions are stored relative to it
    pub root_transform: Mat4,

    pub boundary: BoundaryParameters,
    pub outline: OutlineSettings,
    pub pick: PickOptions,
}

impl Default for PrimitiveConfig {
    fn default() -> Self {
        Self {
            selected_color: Vec4::new(1.0, 0.0, 1.0, 0.5),
            locked_color: Vec4::new(0.5, 0.5, 0.5, 0.3),
            state_texture_width: DEFAULT_STATE_TEXTURE_WIDTH,
            root_transform: Mat4::IDENTITY,
            boundary: BoundaryParameters::default(),
            outline: OutlineSettings::default(),
            pick: PickOptions::default(),
        }
    }
}

impl PrimitiveConfig {
    /// Editing profile: outline on, fine boundary grid
    pub fn editing() -> Self {
        Self {
            boundary: BoundaryParameters::fine(),
            outline: OutlineSettings::enabled(),
            ..Default::default()
        }
    }

    /// Viewing profile for very large selections: ring outline, coarse grid
    pub fn large_selection() -> Self {
        Self {
            boundary: BoundaryParameters::coarse(),
            outline: OutlineSettings::rings(),
            ..Default::default()
        }
    }

    pub fn with_selected_color(mut self, color: Vec4) -> Self {
        self.selected_color = color;
        self
    }

    pub fn with_locked_color(mut self, color: Vec4) -> Self {
        self.locked_color = color;
        self
    }

    pub fn with_state_texture_width(mut self, width: u32) -> Self {
        self.state_texture_width = width.max(1);
        self
    }

    pub fn with_root_transform(mut self, transform: Mat4) -> Self {
        self.root_transform = transform;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryParameters) -> Self {
        self.boundary = boundary.clamped();
        self
    }

    pub fn with_outline(mut self, outline: OutlineSettings) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_pick_options(mut self, pick: PickOptions) -> Self {
        self.pick = pick;
        self
    }
}
