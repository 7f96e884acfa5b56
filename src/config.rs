//! Link configuration
//!
//! Both ends read the same YAML document. Every field has a default, so an
//! empty document is a valid configuration:
//!
//! ```yaml
//! address: "172.27.39.1:50051"
//! idle_timeout_ms: 2000
//! imu_axes: 3
//! streams:
//!   image:
//!     capacity: 4
//!     drop_policy: drop_oldest
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::{DropPolicy, StreamKind};
use crate::{LinkError, Result};

/// Default server port
pub const DEFAULT_PORT: u16 = 50051;

/// Configuration shared by the server and client roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// `host:port` the server binds and the client dials
    pub address: String,

    /// Client connect timeout
    pub connect_timeout_ms: u64,

    /// Longest silence tolerated on a telemetry stream before it is declared stalled
    pub idle_timeout_ms: Option<u64>,

    /// Values per IMU sample
    pub imu_axes: usize,

    /// Values per motor command
    pub motor_channels: usize,

    /// Server acks and closes a command stream after this long without a command
    pub command_flush_interval_ms: Option<u64>,

    /// How long the client waits for the command stream's ack after closing it
    pub ack_timeout_ms: u64,

    /// Largest accepted wire message
    pub max_message_bytes: usize,

    /// Envelopes buffered between stream tasks and the socket writer
    pub outbound_buffer: usize,

    /// Per-kind telemetry queues
    pub streams: StreamsConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_ms: 5_000,
            idle_timeout_ms: Some(5_000),
            imu_axes: 3,
            motor_channels: 2,
            command_flush_interval_ms: None,
            ack_timeout_ms: 2_000,
            max_message_bytes: 8 * 1024 * 1024,
            outbound_buffer: 64,
            streams: StreamsConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| LinkError::config(format!("YAML parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading link config from {}", path.display());
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| LinkError::File { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    /// Builder-style address override.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(LinkError::config("address must not be empty"));
        }
        if self.imu_axes == 0 {
            return Err(LinkError::config("imu_axes must be at least 1"));
        }
        if self.motor_channels == 0 {
            return Err(LinkError::config("motor_channels must be at least 1"));
        }
        if self.max_message_bytes < 64 {
            return Err(LinkError::config("max_message_bytes must be at least 64"));
        }
        if self.outbound_buffer == 0 {
            return Err(LinkError::config("outbound_buffer must be at least 1"));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(LinkError::config("idle_timeout_ms must be positive when set"));
        }
        if self.command_flush_interval_ms == Some(0) {
            return Err(LinkError::config("command_flush_interval_ms must be positive when set"));
        }
        for kind in StreamKind::TELEMETRY {
            if self.streams.for_kind(kind).capacity == 0 {
                return Err(LinkError::config(format!("streams.{}.capacity must be at least 1", kind)));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn command_flush_interval(&self) -> Option<Duration> {
        self.command_flush_interval_ms.map(Duration::from_millis)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Queue settings for each telemetry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamsConfig {
    pub image: QueueConfig,
    pub imu: QueueConfig,
    pub motor_current: QueueConfig,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            image: QueueConfig { capacity: 4, drop_policy: DropPolicy::DropOldest },
            imu: QueueConfig { capacity: 256, drop_policy: DropPolicy::DropOldest },
            motor_current: QueueConfig { capacity: 256, drop_policy: DropPolicy::DropOldest },
        }
    }
}

impl StreamsConfig {
    /// Queue settings for a kind. Commands always use a single latest-wins slot.
    pub fn for_kind(&self, kind: StreamKind) -> QueueConfig {
        match kind {
            StreamKind::Image => self.image,
            StreamKind::Imu => self.imu,
            StreamKind::MotorCurrent => self.motor_current,
            StreamKind::MotorCommand => QueueConfig::LATEST_ONLY,
        }
    }
}

/// Bound and overflow policy for one stream queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub capacity: usize,
    pub drop_policy: DropPolicy,
}

impl QueueConfig {
    /// One slot, newest value wins
    pub const LATEST_ONLY: QueueConfig =
        QueueConfig { capacity: 1, drop_policy: DropPolicy::DropOldest };
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64, drop_policy: DropPolicy::DropOldest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = LinkConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.address, "127.0.0.1:50051");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let yaml = r#"
address: "172.27.39.1:50051"
idle_timeout_ms: 250
imu_axes: 9
streams:
  image:
    capacity: 2
    drop_policy: drop_newest
"#;
        let config = LinkConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.address, "172.27.39.1:50051");
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.imu_axes, 9);
        assert_eq!(
            config.streams.for_kind(StreamKind::Image),
            QueueConfig { capacity: 2, drop_policy: DropPolicy::DropNewest }
        );
        // untouched kinds keep their defaults
        assert_eq!(config.streams.imu, StreamsConfig::default().imu);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = LinkConfig::from_yaml_str("adress: \"x:1\"").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
    }

    #[test]
    fn validation_rejects_zero_sizes() {
        for yaml in [
            "imu_axes: 0",
            "motor_channels: 0",
            "outbound_buffer: 0",
            "idle_timeout_ms: 0",
            "streams: { imu: { capacity: 0 } }",
        ] {
            let err = LinkConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, LinkError::Config { .. }), "accepted {yaml}");
        }
    }

    #[test]
    fn commands_always_use_latest_only_queue() {
        let streams = StreamsConfig::default();
        assert_eq!(streams.for_kind(StreamKind::MotorCommand), QueueConfig::LATEST_ONLY);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LinkConfig::load("/nonexistent/robolink.yaml").unwrap_err();
        match err {
            LinkError::File { path, .. } => assert!(path.ends_with("robolink.yaml")),
            other => panic!("expected File error, got {other:?}"),
        }
    }
}
