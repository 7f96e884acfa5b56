//! Traits for the robot-side collaborators
//!
//! The perception pipeline and the motor drivers live outside this crate. The
//! server talks to them through two seams:
//! - [`SensorSource`]: yields telemetry values, one stream kind per source
//! - [`ActuatorSink`]: receives decoded motor commands

use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

use crate::Result;
use crate::codec::IntoPayload;
use crate::types::MotorCommand;

/// Trait for telemetry acquisition
///
/// Each source handles its own pacing: a camera source waits for the next
/// exposure, an IMU source for the next sample interrupt.
#[async_trait::async_trait]
pub trait SensorSource: Send + 'static {
    /// Value type; determines which stream the values feed
    type Value: IntoPayload;

    /// Get the next value
    ///
    /// Returns:
    /// - `Ok(Some(value))` - New value available
    /// - `Ok(None)` - Source finished (normal termination)
    /// - `Err(e)` - Acquisition failed; the driver backs off and retries
    async fn next_value(&mut self) -> Result<Option<Self::Value>>;
}

/// Trait for the actuation side of the command stream
#[async_trait::async_trait]
pub trait ActuatorSink: Send + Sync + 'static {
    /// Apply one command. Errors are counted as rejected in the stream's ack.
    async fn apply(&self, command: MotorCommand) -> Result<()>;
}

#[async_trait::async_trait]
impl<A: ActuatorSink + ?Sized> ActuatorSink for Arc<A> {
    async fn apply(&self, command: MotorCommand) -> Result<()> {
        (**self).apply(command).await
    }
}

/// Actuator that publishes the latest command on a watch channel.
///
/// A motor control loop reads [`latest`](Self::latest) each cycle, so it
/// always acts on the most recent command and never on a backlog.
#[derive(Debug)]
pub struct WatchActuator {
    commands: watch::Sender<Option<MotorCommand>>,
}

impl Default for WatchActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchActuator {
    pub fn new() -> Self {
        let (commands, _) = watch::channel(None);
        Self { commands }
    }

    /// Receiver for the control loop
    pub fn subscribe(&self) -> watch::Receiver<Option<MotorCommand>> {
        self.commands.subscribe()
    }

    /// Most recent applied command
    pub fn latest(&self) -> Option<MotorCommand> {
        self.commands.borrow().clone()
    }
}

#[async_trait::async_trait]
impl ActuatorSink for WatchActuator {
    async fn apply(&self, command: MotorCommand) -> Result<()> {
        trace!(channels = command.channels(), "Applying motor command");
        self.commands.send_replace(Some(command));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_actuator_exposes_latest_command() {
        let actuator = WatchActuator::new();
        let mut rx = actuator.subscribe();
        assert!(actuator.latest().is_none());

        actuator.apply(MotorCommand::from([0.1, 0.1])).await.unwrap();
        actuator.apply(MotorCommand::from([0.4, -0.4])).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), Some(MotorCommand::from([0.4, -0.4])));
        assert_eq!(actuator.latest(), Some(MotorCommand::from([0.4, -0.4])));
    }
}
