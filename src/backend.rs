mod gpu;
mod software;

pub use gpu::{WgpuBackend, WgpuProgram};
pub use software::{Fragment, PassRecord, SoftwareBackend, SoftwareProgram, Texel, TexelView};

use log::warn;

use crate::error::{Result, SimError};
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::types::{ProgramBindings, StateKind};

/// Opaque handle to a texture owned by a [`RenderBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

/// Storage precision of a ping-pong render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPrecision {
    Full, // RGBA32F
    Half, // RGBA16F
}

/// What the rendering context can do, queried once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub float32_targets: bool,
    pub float16_targets: bool,
    pub max_texture_dimension: u32,
}

impl DeviceCapabilities {
    /// Picks the render-target precision for this device.
    ///
    /// `force_fallback` stands in for the host knowing that full-float
    /// targets are unreliable on its platform.
    pub fn select_precision(&self, force_fallback: bool) -> Result<TargetPrecision> {
        if self.float32_targets && !force_fallback {
            return Ok(TargetPrecision::Full);
        }
        if self.float16_targets {
            if !force_fallback {
                warn!("32-bit float render targets unavailable, falling back to 16-bit");
            }
            return Ok(TargetPrecision::Half);
        }
        Err(SimError::UnsupportedDevice(
            "no renderable floating-point RGBA target format".into(),
        ))
    }
}

/// The rendering context the simulation drives.
///
/// Every texture lives inside the backend and is referred to by
/// [`TextureId`]. Draws go to whatever target was last set with
/// [`RenderBackend::set_render_target`]; `None` is the default target.
pub trait RenderBackend {
    type Program;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Uploads an RGBA32F buffer as a sampled, nearest-filtered texture.
    fn create_state_texture(&mut self, label: &str, dimensions: TextureDimensions, texels: &[f32]) -> Result<TextureId>;

    fn create_render_target(
        &mut self,
        label: &str,
        dimensions: TextureDimensions,
        precision: TargetPrecision,
    ) -> Result<TextureId>;

    /// Program that writes the `source` binding through unchanged.
    fn create_seed_program(&mut self, source: StateKind) -> Result<Self::Program>;

    fn bind_program(&mut self, program: &mut Self::Program, bindings: &ProgramBindings) -> Result<()>;

    fn set_render_target(&mut self, target: Option<TextureId>);

    /// Runs the bound program once per pixel of the current target.
    fn draw_fullscreen_quad(&mut self, program: &Self::Program) -> Result<()>;

    fn read_texels(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>>;

    fn release_texture(&mut self, texture: TextureId);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(float32_targets: bool, float16_targets: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            float32_targets,
            float16_targets,
            max_texture_dimension: 4096,
        }
    }

    #[test]
    fn full_precision_when_supported() {
        assert_eq!(caps(true, true).select_precision(false), Ok(TargetPrecision::Full));
    }

    #[test]
    fn half_precision_when_forced_or_missing() {
        assert_eq!(caps(true, true).select_precision(true), Ok(TargetPrecision::Half));
        assert_eq!(caps(false, true).select_precision(false), Ok(TargetPrecision::Half));
    }

    #[test]
    fn unsupported_without_any_float_target() {
        assert!(matches!(
            caps(false, false).select_precision(false),
            Err(SimError::UnsupportedDevice(_))
        ));
        assert!(matches!(
            caps(true, false).select_precision(true),
            Err(SimError::UnsupportedDevice(_))
        ));
    }
}
