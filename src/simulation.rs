pub mod dimensions;
pub mod engine;
pub mod init;
pub mod params;
pub mod ping_pong;
pub mod types;

pub use dimensions::TextureDimensions;
pub use engine::SimulationEngine;
pub use params::{SimParam, SimulationParams};
pub use ping_pong::PingPongBuffer;
pub use types::{FrameUniforms, ProgramBindings, StateKind};
