//! Discrete actuator states and wire-token decoding.

use crate::error::MotionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Discrete state reported by a remote actuator.
///
/// The proxy holds exactly one current value at any instant. Transitions
/// are driven by remote pushes only; the proxy never infers a state
/// locally, except for the `Unknown` it holds until the first update
/// arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorState {
    /// Not yet usable; motion commands are ignored.
    NotInitialized,
    /// No state update received yet.
    Unknown,
    /// The actuator is running its startup sequence.
    Initializing,
    /// Idle and safe to command.
    Ready,
    /// A motion is in progress.
    Moving,
    /// Stopped on a hardware limit switch.
    OnLimit,
    /// The actuator reported an error.
    Fault,
}

impl MotorState {
    /// Decode a wire token, case-insensitively.
    ///
    /// An unmatched token means the device firmware speaks a different
    /// state vocabulary than this client; the caller must surface that
    /// rather than guess.
    pub fn from_token(token: &str) -> Result<Self, MotionError> {
        match token.to_ascii_uppercase().as_str() {
            "NOTINITIALIZED" => Ok(MotorState::NotInitialized),
            "UNKNOWN" => Ok(MotorState::Unknown),
            "INITIALIZING" => Ok(MotorState::Initializing),
            "READY" => Ok(MotorState::Ready),
            "MOVING" => Ok(MotorState::Moving),
            "ONLIMIT" => Ok(MotorState::OnLimit),
            "FAULT" => Ok(MotorState::Fault),
            _ => Err(MotionError::UnknownStateToken(token.to_string())),
        }
    }
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            MotorState::NotInitialized => "NotInitialized",
            MotorState::Unknown => "Unknown",
            MotorState::Initializing => "Initializing",
            MotorState::Ready => "Ready",
            MotorState::Moving => "Moving",
            MotorState::OnLimit => "OnLimit",
            MotorState::Fault => "Fault",
        };
        f.write_str(token)
    }
}

/// Split an aggregate `name=TOKEN` payload into a per-actuator lookup.
///
/// The server pushes the states of every actuator it hosts in one payload;
/// each proxy extracts only its own entry. Malformed entries are dropped;
/// the rest of the payload is still usable.
pub fn parse_state_table(payload: &[String]) -> HashMap<String, String> {
    let mut table = HashMap::with_capacity(payload.len());
    for entry in payload {
        match entry.split_once('=') {
            Some((name, token)) => {
                table.insert(name.trim().to_string(), token.trim().to_string());
            }
            None => log::debug!("ignoring malformed motor state entry '{}'", entry),
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_decoding_is_case_insensitive() {
        assert_eq!(MotorState::from_token("Ready").unwrap(), MotorState::Ready);
        assert_eq!(MotorState::from_token("MOVING").unwrap(), MotorState::Moving);
        assert_eq!(
            MotorState::from_token("notinitialized").unwrap(),
            MotorState::NotInitialized
        );
        assert_eq!(
            MotorState::from_token("OnLimit").unwrap(),
            MotorState::OnLimit
        );
    }

    #[test]
    fn test_unknown_token_is_an_error() {
        let err = MotorState::from_token("SPINNING").unwrap_err();
        assert!(matches!(err, MotionError::UnknownStateToken(token) if token == "SPINNING"));
    }

    #[test]
    fn test_parse_state_table() {
        let payload = vec![
            "Omega=Ready".to_string(),
            "Kappa=Moving".to_string(),
            "Zoom=Ready".to_string(),
        ];
        let table = parse_state_table(&payload);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("Omega").map(String::as_str), Some("Ready"));
        assert_eq!(table.get("Kappa").map(String::as_str), Some("Moving"));
        assert_eq!(table.get("Phi"), None);
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let payload = vec!["Omega=Ready".to_string(), "garbage".to_string()];
        let table = parse_state_table(&payload);
        assert_eq!(table.len(), 1);
        assert!(table.contains_key("Omega"));
    }

    #[test]
    fn test_display_round_trips_through_decoder() {
        for state in [
            MotorState::NotInitialized,
            MotorState::Unknown,
            MotorState::Initializing,
            MotorState::Ready,
            MotorState::Moving,
            MotorState::OnLimit,
            MotorState::Fault,
        ] {
            assert_eq!(MotorState::from_token(&state.to_string()).unwrap(), state);
        }
    }
}
