//! Custom error types for the motion adapter layer.
//!
//! `MotionError` keeps the failure categories callers must distinguish
//! separate:
//!
//! - **`MotionTimeout`**: the motion-completion wait ran out of time while
//!   the actuator still reported `Moving`. Never conflated with transport
//!   failures; the remote move is still running.
//! - **`NoPosition`**: a position read before the first push ever arrived.
//!   Reported as an error rather than a null value so callers cannot
//!   silently operate on an undefined position.
//! - **`Unavailable`**: a remote attribute or command was not exported by
//!   the device; the dependent operation is disabled.
//! - **`UnknownStateToken`**: an aggregate-state entry carried a token with
//!   no matching [`MotorState`](crate::motor::MotorState) member. This
//!   points at a protocol or firmware mismatch.
//! - **`Transport`**: a channel write or command round-trip failed.
//!
//! No operation in this crate retries automatically; retry is caller
//! policy.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MotionResult<T> = std::result::Result<T, MotionError>;

/// Errors surfaced by the motor adapters.
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("motor '{motor}': motion did not complete within {timeout:?}")]
    MotionTimeout {
        /// Actuator name.
        motor: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    #[error("motor '{0}': no current position known")]
    NoPosition(String),

    #[error("motor '{motor}': {feature} is not available on the remote device")]
    Unavailable {
        /// Actuator name.
        motor: String,
        /// The missing remote attribute or command.
        feature: &'static str,
    },

    #[error("unknown motor state token '{0}'")]
    UnknownStateToken(String),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("duplicate preset name '{0}'")]
    DuplicatePreset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MotionError::NoPosition("omega".to_string());
        assert_eq!(err.to_string(), "motor 'omega': no current position known");
    }

    #[test]
    fn test_timeout_is_distinct_from_transport() {
        let err = MotionError::MotionTimeout {
            motor: "phi".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(matches!(err, MotionError::MotionTimeout { .. }));
        assert!(err.to_string().contains("did not complete"));
    }
}
