//! Motor proxies, their state model and the preset layer.

pub mod preset;
pub mod proxy;
pub mod state;

pub use preset::{Preset, PresetChanged, PresetMotor, PresetTable};
pub use proxy::{MotorEvent, MotorProxy};
pub use state::MotorState;
