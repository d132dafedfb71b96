use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SimError;
use crate::simulation::params::SimulationParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(String),
    #[error("Config validation error: {0}")]
    ValidationError(#[from] SimError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Construction-time settings for a simulation engine.
///
/// Everything the engine would otherwise sniff from its environment is
/// passed in here instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of simulated items, fixed for the engine's lifetime
    pub item_count: u32,
    /// Render into 16-bit float targets even if 32-bit ones are available
    pub device_precision_fallback: bool,
    pub position_seed: u64,
    pub velocity_seed: u64,
    /// Half-extent of the cube initial positions are drawn from
    pub position_spread: f32,
    /// Upper bound of initial speeds
    pub velocity_spread: f32,
    /// Sprite size in pixels for the point renderer
    pub point_size: f32,
    pub params: SimulationParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            item_count: 8192,
            device_precision_fallback: false,
            position_seed: 1,
            velocity_seed: 2,
            position_spread: 100.0,
            velocity_spread: 1.0,
            point_size: 25.0,
            params: SimulationParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_item_count(item_count: u32) -> Self {
        Self {
            item_count,
            ..Self::default()
        }
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.item_count == 0 {
            return Err(SimError::InvalidArgument("item count must be at least 1".into()));
        }
        for (name, value) in [
            ("position_spread", self.position_spread),
            ("velocity_spread", self.velocity_spread),
            ("point_size", self.point_size),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidArgument(format!("{name} must be positive, got {value}")));
            }
        }
        self.params.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn json_overrides_and_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "item_count": 16, "device_precision_fallback": true, "params": { "max_speed": 2.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.item_count, 16);
        assert!(config.device_precision_fallback);
        assert_eq!(config.params.max_speed, 2.5);
        assert_eq!(config.point_size, 25.0);
    }

    #[test]
    fn default_velocities_are_unit_scale() {
        use crate::simulation::dimensions::TextureDimensions;
        use crate::simulation::init::initialize_state;
        use crate::simulation::types::StateKind;

        let config = EngineConfig::default();
        assert_eq!(config.velocity_spread, 1.0);
        let dims = TextureDimensions::allocate(config.item_count).unwrap();
        let texels = initialize_state(
            dims,
            config.item_count,
            StateKind::Velocity,
            config.velocity_seed,
            config.velocity_spread,
        )
        .unwrap();
        for v in texels.chunks_exact(4) {
            let speed = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((0.5 - 1e-4..=1.0 + 1e-4).contains(&speed), "speed {speed}");
        }
    }

    #[test]
    fn zero_items_fail_validation() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "item_count": 0 }"#),
            Err(ConfigError::ValidationError(SimError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ item_count: "),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.json");
        let mut config = EngineConfig::with_item_count(300);
        config.params.cohesion_weight = 2.0;
        fs::write(&path, config.to_json_string().unwrap()).unwrap();

        assert_eq!(EngineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_a_file_error() {
        assert!(matches!(
            EngineConfig::from_json_file("/nonexistent/swarm.json"),
            Err(ConfigError::FileError(_))
        ));
    }
}
