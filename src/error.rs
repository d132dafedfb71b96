use thiserror::Error;

/// Failures surfaced by the simulation core.
///
/// None of these are retried internally. A `RenderFault` leaves the affected
/// ping-pong targets in an unknown state, so the host rebuilds the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Bad item count, non-finite parameter, malformed texel buffer
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// No renderable floating-point target format on this device
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),
    /// A GPU pass failed (validation error, out of memory, context loss)
    #[error("Render fault: {0}")]
    RenderFault(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
