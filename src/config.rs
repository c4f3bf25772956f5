//! Configuration loading for motor adapters.
//!
//! Motors are declared in a TOML file, one table per adapter. The
//! `actuator_name` is the remote addressing identifier; a `presets`
//! sub-table turns the motor into a preset-classified one.
//!
//! ```toml
//! [motors.omega]
//! actuator_name = "Omega"
//! resolution = 0.0001
//!
//! [motors.zoom]
//! actuator_name = "Zoom"
//!
//! [motors.zoom.presets]
//! "Zoom 1" = 1.0
//! "Zoom 2" = 2.0
//! ```

use crate::error::MotionResult;
use crate::motor::preset::PresetTable;
use crate::motor::proxy::{MotorProxy, DEFAULT_RESOLUTION};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One motor declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    /// Remote actuator name, e.g. "Omega".
    pub actuator_name: String,
    /// Minimum meaningful position delta.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Named target positions; empty for plain motors.
    #[serde(default)]
    pub presets: HashMap<String, f64>,
}

fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION
}

impl MotorConfig {
    /// Build an unbound proxy from this declaration.
    pub fn build_proxy(&self) -> MotorProxy {
        MotorProxy::new(&self.actuator_name).with_resolution(self.resolution)
    }

    /// Build the preset table from this declaration.
    pub fn preset_table(&self) -> MotionResult<PresetTable> {
        PresetTable::from_pairs(self.presets.iter().map(|(name, value)| (name.clone(), *value)))
    }
}

/// Top-level adapter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MotionConfig {
    /// Motor declarations, keyed by local identifier.
    #[serde(default)]
    pub motors: HashMap<String, MotorConfig>,
}

impl MotionConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MotionResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
