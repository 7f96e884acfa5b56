//! Stream kinds and overflow policies

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of value a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Compressed camera frames (robot → operator)
    Image,
    /// Fixed-arity IMU vectors (robot → operator)
    Imu,
    /// Packed motor current scalars (robot → operator)
    MotorCurrent,
    /// Motor commands (operator → robot)
    MotorCommand,
}

impl StreamKind {
    /// Telemetry kinds, in the order the producer tracks them.
    pub const TELEMETRY: [StreamKind; 3] =
        [StreamKind::Image, StreamKind::Imu, StreamKind::MotorCurrent];

    /// Short lowercase name used in logs and config keys.
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Image => "image",
            StreamKind::Imu => "imu",
            StreamKind::MotorCurrent => "motor_current",
            StreamKind::MotorCommand => "motor_command",
        }
    }

    /// Whether values of this kind flow from the robot to the operator.
    pub fn is_telemetry(self) -> bool {
        !matches!(self, StreamKind::MotorCommand)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a bounded stream queue does when a value arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest buffered value and keep the new one (favors recency)
    #[default]
    DropOldest,
    /// Reject the new value and keep what is buffered (favors completeness)
    DropNewest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_kinds_exclude_commands() {
        assert!(StreamKind::TELEMETRY.iter().all(|kind| kind.is_telemetry()));
        assert!(!StreamKind::MotorCommand.is_telemetry());
    }

    #[test]
    fn drop_policy_uses_snake_case_names() {
        let policy: DropPolicy = serde_yaml_ng::from_str("drop_newest").unwrap();
        assert_eq!(policy, DropPolicy::DropNewest);
        assert_eq!(DropPolicy::default(), DropPolicy::DropOldest);
    }
}
