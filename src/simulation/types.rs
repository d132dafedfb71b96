use bytemuck::{Pod, Zeroable};

use crate::backend::TextureId;
use crate::simulation::dimensions::TextureDimensions;
use crate::simulation::params::SimulationParams;

// Each state pixel is one RGBA record.
pub const CHANNELS: usize = 4;

/// Which half of an item's state a texture holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Position, // xyz = position, w = phase
    Velocity, // xyz = velocity, w = per-item scalar >= 0
}

impl StateKind {
    pub fn label(self) -> &'static str {
        match self {
            StateKind::Position => "Position",
            StateKind::Velocity => "Velocity",
        }
    }
}

/// Per-pass uniforms every program receives.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub elapsed_time: f32,
    pub delta_time: f32,
    pub resolution: [f32; 2],
    pub item_count: u32,
    pub _padding: [u32; 3],
}

impl FrameUniforms {
    pub fn new(elapsed_time: f32, delta_time: f32, dimensions: TextureDimensions, item_count: u32) -> Self {
        Self {
            elapsed_time,
            delta_time,
            resolution: dimensions.as_extent(),
            item_count,
            _padding: [0; 3],
        }
    }
}

/// Everything uploaded to a program before its pass.
///
/// `params` is only set for velocity programs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramBindings {
    pub positions: TextureId,
    pub velocities: TextureId,
    pub frame: FrameUniforms,
    pub params: Option<SimulationParams>,
}

impl ProgramBindings {
    pub fn reads(&self, texture: TextureId) -> bool {
        self.positions == texture || self.velocities == texture
    }

    pub fn texture_for(&self, kind: StateKind) -> TextureId {
        match kind {
            StateKind::Position => self.positions,
            StateKind::Velocity => self.velocities,
        }
    }
}
