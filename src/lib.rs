//! GPU flocking simulation whose per-item state lives in float textures and
//! is advanced by ping-ponged full-screen fragment passes.

pub mod backend;
pub mod config;
pub mod error;
pub mod rendering;
pub mod simulation;

pub use backend::{RenderBackend, SoftwareBackend, TargetPrecision, TextureId, WgpuBackend};
pub use config::{ConfigError, EngineConfig};
pub use error::{Result, SimError};
pub use rendering::RenderBridge;
pub use simulation::{SimParam, SimulationEngine, SimulationParams};
