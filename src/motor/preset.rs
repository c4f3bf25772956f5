//! Named preset positions layered over a motor proxy.
//!
//! Some actuators are continuous in hardware but discrete in use: a
//! zoom stage parks on "Zoom 1" through "Zoom 10", not on 3.7. A
//! [`PresetMotor`] composes a [`MotorProxy`] with a value-ordered
//! [`PresetTable`]: it classifies the live position onto a preset name,
//! emits a notification whenever that classification changes, and steps
//! through the presets in value order.
//!
//! Classification is recomputed from the live position on every query,
//! never cached, so it always reflects the latest push.

use crate::error::{MotionError, MotionResult};
use crate::motor::proxy::{MotorEvent, MotorProxy, LIMITS_FALLBACK};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Fixed tolerance for matching a position onto a preset, independent of
/// the motor's resolution.
pub const POSITION_TOLERANCE: f64 = 1e-3;

const EVENT_CAPACITY: usize = 64;

/// A named target position.
#[derive(Clone, Debug, PartialEq)]
pub struct Preset {
    /// Operator-facing name, e.g. "Zoom 3".
    pub name: String,
    /// Target position in actuator units.
    pub value: f64,
}

/// Value-ordered table of named target positions.
///
/// Names are unique; the numeric values define the order used for
/// relative stepping.
#[derive(Clone, Debug, Default)]
pub struct PresetTable {
    presets: Vec<Preset>,
}

impl PresetTable {
    /// Build a table from (name, value) pairs, sorted by value.
    /// Duplicate names are rejected; preset tables are operator-edited
    /// configuration and a silent overwrite would hide the mistake.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, f64)>) -> MotionResult<Self> {
        let mut seen = HashSet::new();
        let mut presets = Vec::new();
        for (name, value) in pairs {
            if !seen.insert(name.clone()) {
                return Err(MotionError::DuplicatePreset(name));
            }
            presets.push(Preset { name, value });
        }
        presets.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(Self { presets })
    }

    /// Number of presets.
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Whether the table holds no presets.
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Preset names in value order.
    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    /// Target value of a named preset.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.presets
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    /// Rank of a named preset in value order.
    pub fn rank_of(&self, name: &str) -> Option<usize> {
        self.presets.iter().position(|p| p.name == name)
    }

    /// Preset at the given rank.
    pub fn get(&self, rank: usize) -> Option<&Preset> {
        self.presets.get(rank)
    }

    /// The preset whose target lies within [`POSITION_TOLERANCE`] of
    /// `position`, if any.
    pub fn classify(&self, position: f64) -> Option<&Preset> {
        self.presets
            .iter()
            .find(|p| (p.value - position).abs() <= POSITION_TOLERANCE)
    }

    /// Lowest and highest target values.
    pub fn span(&self) -> Option<(f64, f64)> {
        match (self.presets.first(), self.presets.last()) {
            (Some(first), Some(last)) => Some((first.value, last.value)),
            _ => None,
        }
    }
}

/// Notification that the derived preset classification changed.
///
/// `name`/`value` are both `None` when the position stopped matching any
/// preset.
#[derive(Clone, Debug, PartialEq)]
pub struct PresetChanged {
    /// Matched preset name.
    pub name: Option<String>,
    /// The matched preset's target value.
    pub value: Option<f64>,
}

/// A motor whose positions of interest are named presets.
///
/// Owns the underlying [`MotorProxy`] by shared handle and subscribes to
/// its notifications; callers keep full access to the raw motor.
pub struct PresetMotor {
    motor: Arc<MotorProxy>,
    presets: PresetTable,
    events: broadcast::Sender<PresetChanged>,
    classifier: JoinHandle<()>,
}

impl PresetMotor {
    /// Wrap an initialized motor proxy with a preset table.
    pub fn new(motor: Arc<MotorProxy>, presets: PresetTable) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let classifier = spawn_classifier(motor.clone(), presets.clone(), events.clone());
        Self {
            motor,
            presets,
            events,
            classifier,
        }
    }

    /// The underlying motor proxy.
    pub fn motor(&self) -> &MotorProxy {
        &self.motor
    }

    /// The preset table.
    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// Preset names in value order.
    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.names()
    }

    /// Bounds of the preset range, for UI code that treats the presets as
    /// the travel range. Falls back like a failed remote limits query
    /// when the table is empty.
    pub fn limits(&self) -> (f64, f64) {
        self.presets.span().unwrap_or(LIMITS_FALLBACK)
    }

    /// The preset matching the live position, recomputed on every call.
    /// `None` while the position is unknown or between presets.
    pub fn current_preset_name(&self) -> Option<String> {
        let position = self.motor.position().ok()?;
        self.presets.classify(position).map(|p| p.name.clone())
    }

    /// Subscribe to classification-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PresetChanged> {
        self.events.subscribe()
    }

    /// Move to a named preset. An unknown name is an operator error,
    /// logged rather than raised, since preset tables are editable configuration.
    pub async fn move_to_preset(&self, name: &str) -> MotionResult<()> {
        let Some(value) = self.presets.value_of(name) else {
            warn!(
                "motor '{}': cannot move, unknown preset '{}'",
                self.motor.name(),
                name
            );
            return Ok(());
        };
        self.motor.move_to(value).await
    }

    /// Move one preset up in value order. A no-op at the top of the
    /// table or while the position matches no preset.
    pub async fn step_next(&self) -> MotionResult<()> {
        self.step(1).await
    }

    /// Move one preset down in value order. A no-op at the bottom of the
    /// table or while the position matches no preset.
    pub async fn step_previous(&self) -> MotionResult<()> {
        self.step(-1).await
    }

    async fn step(&self, delta: isize) -> MotionResult<()> {
        let Some(current) = self.current_preset_name() else {
            debug!(
                "motor '{}': position matches no preset, step ignored",
                self.motor.name()
            );
            return Ok(());
        };
        let Some(rank) = self.presets.rank_of(&current) else {
            return Ok(());
        };
        let Some(target_rank) = rank.checked_add_signed(delta) else {
            return Ok(());
        };
        let Some(target) = self.presets.get(target_rank) else {
            return Ok(());
        };
        self.motor.move_to(target.value).await
    }
}

impl Drop for PresetMotor {
    fn drop(&mut self) {
        self.classifier.abort();
    }
}

/// Re-derive the preset name on every position update and notify only
/// when it differs from the previously emitted one, the same
/// dedup-on-change discipline the motor applies to state transitions.
fn spawn_classifier(
    motor: Arc<MotorProxy>,
    presets: PresetTable,
    events: broadcast::Sender<PresetChanged>,
) -> JoinHandle<()> {
    let mut rx = motor.subscribe();
    tokio::spawn(async move {
        // None until the first classification has been emitted
        let mut last_emitted: Option<Option<String>> = None;
        loop {
            match rx.recv().await {
                Ok(MotorEvent::ValueChanged(position)) => {
                    let preset = presets.classify(position);
                    let name = preset.map(|p| p.name.clone());
                    if last_emitted.as_ref() != Some(&name) {
                        let value = preset.map(|p| p.value);
                        last_emitted = Some(name.clone());
                        let _ = events.send(PresetChanged { name, value });
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "motor '{}': classifier dropped {} updates",
                        motor.name(),
                        skipped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoom_table() -> PresetTable {
        PresetTable::from_pairs((1..=10).map(|i| (format!("Zoom {i}"), f64::from(i)))).unwrap()
    }

    #[test]
    fn test_table_is_value_ordered_regardless_of_insertion_order() {
        let table = PresetTable::from_pairs(vec![
            ("high".to_string(), 30.0),
            ("low".to_string(), 10.0),
            ("mid".to_string(), 20.0),
        ])
        .unwrap();
        assert_eq!(table.names(), vec!["low", "mid", "high"]);
        assert_eq!(table.rank_of("mid"), Some(1));
        assert_eq!(table.span(), Some((10.0, 30.0)));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = PresetTable::from_pairs(vec![
            ("Zoom 1".to_string(), 1.0),
            ("Zoom 1".to_string(), 2.0),
        ])
        .unwrap_err();
        assert!(matches!(err, MotionError::DuplicatePreset(name) if name == "Zoom 1"));
    }

    #[test]
    fn test_classification_tolerance() {
        let table = zoom_table();
        assert_eq!(table.classify(5.0).map(|p| p.name.as_str()), Some("Zoom 5"));
        assert_eq!(
            table.classify(5.0006).map(|p| p.name.as_str()),
            Some("Zoom 5")
        );
        assert_eq!(table.classify(5.01), None);
        // boundary: exactly the tolerance still matches
        assert_eq!(
            table.classify(5.001).map(|p| p.name.as_str()),
            Some("Zoom 5")
        );
    }

    #[test]
    fn test_value_lookup() {
        let table = zoom_table();
        assert_eq!(table.value_of("Zoom 3"), Some(3.0));
        assert_eq!(table.value_of("Zoom 99"), None);
        assert_eq!(table.len(), 10);
        assert!(!table.is_empty());
    }

    #[tokio::test]
    async fn test_current_preset_tracks_live_position() {
        let motor = Arc::new(MotorProxy::new("Zoom"));
        let zoom = PresetMotor::new(motor.clone(), zoom_table());

        assert_eq!(zoom.current_preset_name(), None);

        motor.update_value(5.0);
        assert_eq!(zoom.current_preset_name().as_deref(), Some("Zoom 5"));

        motor.update_value(5.01);
        assert_eq!(zoom.current_preset_name(), None);
    }

    #[tokio::test]
    async fn test_limits_come_from_the_table() {
        let motor = Arc::new(MotorProxy::new("Zoom"));
        let zoom = PresetMotor::new(motor, zoom_table());
        assert_eq!(zoom.limits(), (1.0, 10.0));

        let empty = PresetMotor::new(
            Arc::new(MotorProxy::new("Zoom")),
            PresetTable::default(),
        );
        assert_eq!(empty.limits(), LIMITS_FALLBACK);
    }
}
