//! Latest-wins motor command stream

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::channel::{CallGuard, Channel};
use crate::codec::encode_command;
use crate::error::TerminationCause;
use crate::stream::LatestSlot;
use crate::types::MotorCommand;
use crate::wire::{Ack, CallId, Operation, Payload};
use crate::{LinkError, Result};

/// Sends motor commands to the robot over one `StreamMotorCommand` call.
///
/// Only the newest command matters to a motor controller, so the publisher
/// buffers at most one unsent command: submitting while the previous one is
/// still waiting for the transport replaces it. [`send`](Self::send) adds
/// backpressure by waiting until its command has been handed to the transport.
///
/// ```rust,no_run
/// use robolink::{ConnectionManager, LinkConfig, MotorCommand};
///
/// # async fn example() -> robolink::Result<()> {
/// let link = ConnectionManager::connect(LinkConfig::default()).await?;
/// let publisher = link.command_publisher().await?;
/// publisher.send(MotorCommand::from([0.4, 0.4])).await?;
/// publisher.send(MotorCommand::stop(2)).await?;
/// let ack = publisher.finish().await?;
/// println!("robot applied {} commands", ack.applied);
/// # Ok(())
/// # }
/// ```
pub struct CommandPublisher {
    call: CallId,
    pending: Arc<LatestSlot<MotorCommand>>,
    pump: Option<JoinHandle<Result<Ack>>>,
}

impl CommandPublisher {
    /// Open a command stream on the channel.
    pub async fn open(channel: &Channel) -> Result<Self> {
        let guard = channel.open_call(Operation::StreamMotorCommand).await?;
        let call = guard.call();
        let ack_timeout = channel.config().ack_timeout();
        let pending = Arc::new(LatestSlot::new());
        let pump = tokio::spawn(pump_commands(guard, Arc::clone(&pending), ack_timeout));
        debug!(%call, "Command stream opened");
        Ok(Self { call, pending, pump: Some(pump) })
    }

    pub fn call(&self) -> CallId {
        self.call
    }

    /// Queue a command without waiting, replacing any unsent one.
    ///
    /// Returns the command that was replaced, if any.
    pub fn submit(&self, command: MotorCommand) -> Result<Option<MotorCommand>> {
        encode_command(&command)?;
        self.pending.put(command).map_err(|_| LinkError::closed("command stream"))
    }

    /// Queue a command and wait until the transport has taken it.
    pub async fn send(&self, command: MotorCommand) -> Result<()> {
        self.submit(command)?;
        self.pending.drained().await;
        if self.pending.is_closed() && self.pending.is_pending() {
            return Err(LinkError::closed("command stream"));
        }
        Ok(())
    }

    /// Wait until no command is waiting for the transport.
    pub async fn ready(&self) {
        self.pending.drained().await;
    }

    /// Forward every command from a stream, with backpressure.
    ///
    /// Returns how many commands were sent.
    pub async fn publish_all<S>(&self, commands: S) -> Result<u64>
    where
        S: Stream<Item = MotorCommand>,
    {
        let mut commands = std::pin::pin!(commands);
        let mut sent = 0;
        while let Some(command) = commands.next().await {
            self.send(command).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Commands replaced before the transport took them
    pub fn superseded(&self) -> u64 {
        self.pending.superseded()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Close the stream after the pending command is sent and wait for the
    /// robot's acknowledgement.
    pub async fn finish(mut self) -> Result<Ack> {
        self.pending.close();
        match self.pump.take() {
            Some(pump) => pump.await.map_err(|e| LinkError::Io(std::io::Error::other(e)))?,
            None => Err(LinkError::closed("command stream")),
        }
    }
}

impl Drop for CommandPublisher {
    fn drop(&mut self) {
        if self.pump.is_some() {
            // discard the unsent command; the pump still closes the call
            self.pending.abandon();
        }
    }
}

/// Moves commands from the slot onto the wire, one at a time.
///
/// At most one command is ever between the slot and the socket.
async fn pump_commands(
    mut guard: CallGuard,
    pending: Arc<LatestSlot<MotorCommand>>,
    ack_timeout: Duration,
) -> Result<Ack> {
    let call = guard.call();
    let mut sent = 0u64;

    let server_ended = loop {
        let next = tokio::select! {
            command = pending.take() => command,
            _ = guard.slot().closed() => break true,
        };
        let Some(command) = next else {
            break false;
        };

        let message = match encode_command(&command) {
            Ok(message) => message,
            Err(e) => {
                warn!(%call, "Dropping command: {}", e);
                continue;
            }
        };
        let written = match guard.send_item(Payload::MotorCommand(message)).await {
            Ok(written) => written,
            Err(e) => {
                pending.close();
                return Err(e);
            }
        };
        sent += 1;
        trace!(%call, sent, "Command queued");

        // newer commands wait in the slot, overwriting each other, until
        // this one has left the writer
        tokio::select! {
            _ = written => {}
            _ = guard.slot().closed() => break true,
        }
    };
    pending.close();

    if !server_ended {
        guard.half_close().await?;
    }
    if tokio::time::timeout(ack_timeout, guard.slot().closed()).await.is_err() {
        return Err(LinkError::Timeout { duration: ack_timeout });
    }

    match guard.slot().take_ack() {
        Some(ack) => {
            info!(%call, sent, applied = ack.applied, superseded = ack.superseded, "Commands acknowledged");
            Ok(ack)
        }
        None => {
            let cause = guard.slot().end_cause().unwrap_or(TerminationCause::ConnectionClosed);
            Err(LinkError::terminated(cause))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::wire::{Body, Envelope, MotorCommandMessage, Outgoing};
    use tokio::sync::mpsc;

    /// A channel whose writer never runs; queued envelopes stay unwritten.
    fn detached_channel() -> (Channel, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(16);
        (Channel::new(1, Arc::new(LinkConfig::default()), tx), rx)
    }

    /// A channel whose writer takes every envelope as soon as it is queued.
    fn draining_channel() -> (Channel, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, mut rx) = mpsc::channel::<Outgoing>(16);
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                if written_tx.send(outgoing.envelope).is_err() {
                    break;
                }
            }
        });
        (Channel::new(1, Arc::new(LinkConfig::default()), tx), written_rx)
    }

    #[tokio::test]
    async fn unsent_command_is_replaced_by_newer_one() {
        let (channel, mut wire) = detached_channel();
        let publisher = CommandPublisher::open(&channel).await.unwrap();

        // the pump has not run yet on this single-threaded runtime
        assert_eq!(publisher.submit(MotorCommand::from([0.1, 0.1])).unwrap(), None);
        let replaced = publisher.submit(MotorCommand::from([0.9, -0.9])).unwrap();
        assert_eq!(replaced, Some(MotorCommand::from([0.1, 0.1])));
        assert_eq!(publisher.superseded(), 1);

        assert_eq!(
            wire.recv().await.unwrap().envelope,
            Envelope::open(publisher.call(), Operation::StreamMotorCommand)
        );
        assert_eq!(
            wire.recv().await.unwrap().envelope,
            Envelope::item(
                publisher.call(),
                1,
                Payload::MotorCommand(MotorCommandMessage { values: vec![0.9, -0.9] })
            )
        );
        publisher.ready().await;
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_commands_are_refused_up_front() {
        let (channel, _wire) = detached_channel();
        let publisher = CommandPublisher::open(&channel).await.unwrap();
        let err = publisher.submit(MotorCommand::from([f32::NAN, 0.0])).unwrap_err();
        assert!(matches!(err, LinkError::InvalidCommand { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_half_closes_and_times_out_without_ack() {
        let (channel, mut wire) = draining_channel();
        let publisher = CommandPublisher::open(&channel).await.unwrap();
        let call = publisher.call();
        publisher.send(MotorCommand::stop(2)).await.unwrap();

        let err = publisher.finish().await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));

        let mut bodies = Vec::new();
        while let Ok(envelope) = wire.try_recv() {
            assert_eq!(envelope.call, call);
            bodies.push(envelope.body);
        }
        assert!(matches!(bodies[0], Body::Open(Operation::StreamMotorCommand)));
        assert!(matches!(bodies[1], Body::Item { seq: 1, .. }));
        assert_eq!(bodies[2], Body::HalfClose);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_holds_newer_commands_in_the_slot() {
        let (channel, mut wire) = detached_channel();
        let publisher = CommandPublisher::open(&channel).await.unwrap();
        let call = publisher.call();

        publisher.send(MotorCommand::from([1.0, 0.0])).await.unwrap();
        // the first command is still with the writer, so this one stays pending
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            publisher.send(MotorCommand::from([2.0, 0.0])),
        )
        .await;
        assert!(blocked.is_err());
        for i in 3..10 {
            publisher.submit(MotorCommand::from([i as f32, 0.0])).unwrap();
        }
        assert_eq!(publisher.superseded(), 7);

        let mut queued = Vec::new();
        while let Ok(outgoing) = wire.try_recv() {
            queued.push(outgoing.envelope);
        }
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0], Envelope::open(call, Operation::StreamMotorCommand));
        assert!(matches!(queued[1].body, Body::Item { seq: 1, .. }));

        // once the writer took the first command, only the latest follows
        assert_eq!(
            wire.recv().await.unwrap().envelope,
            Envelope::item(
                call,
                2,
                Payload::MotorCommand(MotorCommandMessage { values: vec![9.0, 0.0] })
            )
        );
        publisher.ready().await;
        assert!(!publisher.is_closed());
    }

    #[tokio::test]
    async fn closed_channel_fails_the_publisher() {
        let (channel, _wire) = detached_channel();
        let publisher = CommandPublisher::open(&channel).await.unwrap();
        channel.close();
        let err = publisher.finish().await.unwrap_err();
        assert!(matches!(err, LinkError::Connection { .. }));
        assert!(channel.is_closed());
    }
}
