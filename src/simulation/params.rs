use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Flocking tunables read by the velocity program once per tick.
///
/// Layout matches the `SimParams` block declared in the program prelude.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub separation_weight: f32,
    pub centering_weight: f32,
    pub neighbor_range_align: f32,
    pub neighbor_range_cohesion: f32,
    pub neighbor_range: f32,
    pub max_speed: f32, // units per second; a clamp target
    pub max_force: f32,
    #[serde(skip)]
    pub _padding: [f32; 3], // Uniform blocks are 16-byte aligned
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            alignment_weight: 1.0,
            cohesion_weight: 0.8,
            separation_weight: 1.4,
            centering_weight: 0.25,
            neighbor_range_align: 18.0,
            neighbor_range_cohesion: 24.0,
            neighbor_range: 8.0,
            max_speed: 30.0,
            max_force: 15.0,
            _padding: [0.0; 3],
        }
    }
}

/// Name of one field of [`SimulationParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimParam {
    AlignmentWeight,
    CohesionWeight,
    SeparationWeight,
    CenteringWeight,
    NeighborRangeAlign,
    NeighborRangeCohesion,
    NeighborRange,
    MaxSpeed,
    MaxForce,
}

impl SimParam {
    pub const ALL: [SimParam; 9] = [
        SimParam::AlignmentWeight,
        SimParam::CohesionWeight,
        SimParam::SeparationWeight,
        SimParam::CenteringWeight,
        SimParam::NeighborRangeAlign,
        SimParam::NeighborRangeCohesion,
        SimParam::NeighborRange,
        SimParam::MaxSpeed,
        SimParam::MaxForce,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SimParam::AlignmentWeight => "alignment_weight",
            SimParam::CohesionWeight => "cohesion_weight",
            SimParam::SeparationWeight => "separation_weight",
            SimParam::CenteringWeight => "centering_weight",
            SimParam::NeighborRangeAlign => "neighbor_range_align",
            SimParam::NeighborRangeCohesion => "neighbor_range_cohesion",
            SimParam::NeighborRange => "neighbor_range",
            SimParam::MaxSpeed => "max_speed",
            SimParam::MaxForce => "max_force",
        }
    }

    /// Suggested slider range for a control panel. Not enforced by the core.
    pub fn range(self) -> (f32, f32) {
        match self {
            SimParam::AlignmentWeight
            | SimParam::CohesionWeight
            | SimParam::SeparationWeight
            | SimParam::CenteringWeight => (0.0, 5.0),
            SimParam::NeighborRangeAlign
            | SimParam::NeighborRangeCohesion
            | SimParam::NeighborRange => (0.0, 100.0),
            SimParam::MaxSpeed => (0.0, 100.0),
            SimParam::MaxForce => (0.0, 50.0),
        }
    }
}

impl fmt::Display for SimParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SimParam {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        SimParam::ALL
            .into_iter()
            .find(|param| param.name() == s)
            .ok_or_else(|| SimError::InvalidArgument(format!("unknown simulation parameter `{s}`")))
    }
}

impl SimulationParams {
    pub fn get(&self, param: SimParam) -> f32 {
        match param {
            SimParam::AlignmentWeight => self.alignment_weight,
            SimParam::CohesionWeight => self.cohesion_weight,
            SimParam::SeparationWeight => self.separation_weight,
            SimParam::CenteringWeight => self.centering_weight,
            SimParam::NeighborRangeAlign => self.neighbor_range_align,
            SimParam::NeighborRangeCohesion => self.neighbor_range_cohesion,
            SimParam::NeighborRange => self.neighbor_range,
            SimParam::MaxSpeed => self.max_speed,
            SimParam::MaxForce => self.max_force,
        }
    }

    /// Sets one parameter. Non-finite or negative values are rejected, never clamped.
    pub fn set(&mut self, param: SimParam, value: f32) -> Result<()> {
        check_value(param, value)?;
        let slot = match param {
            SimParam::AlignmentWeight => &mut self.alignment_weight,
            SimParam::CohesionWeight => &mut self.cohesion_weight,
            SimParam::SeparationWeight => &mut self.separation_weight,
            SimParam::CenteringWeight => &mut self.centering_weight,
            SimParam::NeighborRangeAlign => &mut self.neighbor_range_align,
            SimParam::NeighborRangeCohesion => &mut self.neighbor_range_cohesion,
            SimParam::NeighborRange => &mut self.neighbor_range,
            SimParam::MaxSpeed => &mut self.max_speed,
            SimParam::MaxForce => &mut self.max_force,
        };
        *slot = value;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        SimParam::ALL
            .into_iter()
            .try_for_each(|param| check_value(param, self.get(param)))
    }
}

fn check_value(param: SimParam, value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(SimError::InvalidArgument(format!("{param} must be finite, got {value}")));
    }
    if value < 0.0 {
        return Err(SimError::InvalidArgument(format!("{param} must not be negative, got {value}")));
    }
    Ok(())
}
