//! Client-side hardware adapters for MD-series diffractometers.
//!
//! The diffractometer's device-control server exposes its motorized
//! actuators over a name/value "exporter" protocol: channels push position
//! and state updates to subscribers, and commands drive aborts, limit
//! queries and homing. This crate provides the client half of that
//! protocol for motion control.
//!
//! # Architecture Overview
//!
//! - [`exporter`]: the transport boundary: [`exporter::Channel`],
//!   [`exporter::Command`] and [`exporter::ExporterBinding`] traits, plus an
//!   in-process mock server for tests.
//! - [`motor::MotorProxy`]: mirrors one remote actuator. Push notifications
//!   keep a cached (state, position) pair current; callers issue
//!   move/stop/home commands and may block on motion completion.
//! - [`motor::PresetMotor`]: maps a continuous position onto named presets
//!   ("Zoom 3") and supports relative stepping through the preset order.
//!
//! # Data Flow
//!
//! ```text
//! exporter pushes --> MotorProxy cache --> broadcast events --> UI / PresetMotor
//! ```
//!
//! # Thread Safety
//!
//! Each proxy's cached state has a single writer role (the push handlers)
//! and many readers. Reads never block; the only suspending operation is
//! the motion-completion wait.

pub mod config;
pub mod error;
pub mod exporter;
pub mod motor;

pub use error::{MotionError, MotionResult};
