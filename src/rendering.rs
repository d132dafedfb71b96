pub mod bridge;
pub mod camera;
pub mod points;
pub mod renderer;

pub use bridge::RenderBridge;
pub use camera::OrbitCamera;
pub use points::PointsRenderer;
pub use renderer::{Renderer, build_engine};
