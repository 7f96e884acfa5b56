//! Operator-side connection lifecycle

use futures::Stream;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::channel::{Channel, read_envelopes};
use super::consumer::StreamConsumer;
use super::publisher::CommandPublisher;
use crate::config::LinkConfig;
use crate::error::TerminationCause;
use crate::wire::{WireCodec, write_envelopes};
use crate::{LinkError, Result};

/// Observable state of the managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// A channel is established
    Connected { generation: u64 },
    /// No channel; `reason` is set when the transport failed
    Disconnected { generation: u64, reason: Option<String> },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Connection attempt this state belongs to; 0 before the first connect
    pub fn generation(&self) -> u64 {
        match self {
            ConnectionState::Connected { generation }
            | ConnectionState::Disconnected { generation, .. } => *generation,
        }
    }
}

struct Lifecycle {
    channel: Option<Channel>,
    generation: u64,
}

/// Owns the single connection to the robot.
///
/// Connecting is explicit and never retried behind the caller's back. When the
/// transport dies every open stream ends, the state flips to
/// [`ConnectionState::Disconnected`], and the caller decides whether to
/// [`reconnect`](Self::reconnect).
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use robolink::{ConnectionManager, LinkConfig};
///
/// # async fn example() -> robolink::Result<()> {
/// let link = ConnectionManager::connect(LinkConfig::default()).await?;
/// let mut imu = link.consumer().await?.stream_imu().await?;
/// while let Some(sample) = imu.next().await {
///     println!("{:?}", sample?.values());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    config: Arc<LinkConfig>,
    lifecycle: Mutex<Lifecycle>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    /// Validate the config and establish the first connection.
    pub async fn connect(config: LinkConfig) -> Result<Self> {
        let manager = Self::new(config)?;
        manager.reconnect().await?;
        Ok(manager)
    }

    /// Create a manager without connecting.
    pub fn new(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) =
            watch::channel(ConnectionState::Disconnected { generation: 0, reason: None });
        Ok(Self {
            config: Arc::new(config),
            lifecycle: Mutex::new(Lifecycle { channel: None, generation: 0 }),
            state: Arc::new(state),
        })
    }

    /// Replace the current connection with a fresh one.
    ///
    /// Streams opened on the previous channel end with
    /// [`TerminationCause::ConnectionClosed`]; callers re-subscribe on the new one.
    pub async fn reconnect(&self) -> Result<Channel> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(previous) = lifecycle.channel.take() {
            debug!(generation = previous.generation(), "Closing previous connection");
            previous.close();
        }

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        match open_channel(&self.config, generation, Arc::clone(&self.state)).await {
            Ok(channel) => {
                lifecycle.channel = Some(channel.clone());
                self.state.send_replace(ConnectionState::Connected { generation });
                if channel.is_closed() {
                    // the server hung up before the state was published
                    self.state.send_replace(ConnectionState::Disconnected {
                        generation,
                        reason: None,
                    });
                }
                info!(generation, "Connected to {}", self.config.address);
                Ok(channel)
            }
            Err(e) => {
                warn!(generation, "Connection to {} failed: {}", self.config.address, e);
                self.state.send_replace(ConnectionState::Disconnected {
                    generation,
                    reason: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Current channel, if the connection is alive.
    pub async fn channel(&self) -> Result<Channel> {
        let lifecycle = self.lifecycle.lock().await;
        match lifecycle.channel.as_ref() {
            Some(channel) if !channel.is_closed() => Ok(channel.clone()),
            _ => Err(LinkError::connection_failed(self.config.address.clone(), "not connected")),
        }
    }

    /// Telemetry consumer bound to the current channel.
    pub async fn consumer(&self) -> Result<StreamConsumer> {
        Ok(StreamConsumer::new(self.channel().await?))
    }

    /// Open a command stream on the current channel.
    pub async fn command_publisher(&self) -> Result<CommandPublisher> {
        CommandPublisher::open(&self.channel().await?).await
    }

    /// Close the connection. Open streams end normally.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(channel) = lifecycle.channel.take() {
            channel.close();
            self.state.send_replace(ConnectionState::Disconnected {
                generation: channel.generation(),
                reason: None,
            });
            info!(generation = channel.generation(), "Disconnected from {}", self.config.address);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Current state followed by every change.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + Unpin + 'static {
        WatchStream::new(self.state.subscribe())
    }

    /// Wait until the connection is lost or closed.
    pub async fn disconnected(&self) -> ConnectionState {
        let mut states = self.state.subscribe();
        match states.wait_for(|state| !state.is_connected()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(channel) = self.lifecycle.get_mut().channel.take() {
            debug!(generation = channel.generation(), "Dropping connection");
            channel.close();
        }
    }
}

async fn open_channel(
    config: &Arc<LinkConfig>,
    generation: u64,
    state: Arc<watch::Sender<ConnectionState>>,
) -> Result<Channel> {
    let address = config.address.as_str();
    let timeout = config.connect_timeout();
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(LinkError::connection_failed_with_source(
                address,
                e.to_string(),
                Box::new(e),
            ));
        }
        Err(_) => {
            return Err(LinkError::connection_failed(
                address,
                format!("no answer within {:?}", timeout),
            ));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle: {}", e);
    }

    let max = config.max_message_bytes;
    let (read_half, write_half) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::channel(config.outbound_buffer);
    let channel = Channel::new(generation, Arc::clone(config), outbound);

    let writer_channel = channel.clone();
    tokio::spawn(async move {
        let sink = FramedWrite::new(write_half, WireCodec::new(max));
        if let Err(e) = write_envelopes(sink, outbound_rx, writer_channel.closed_token()).await {
            warn!(generation, "Connection write failed: {}", e);
            writer_channel.fail_all(TerminationCause::Transport(e.to_string()));
        }
    });

    let reader = FramedRead::new(read_half, WireCodec::new(max));
    let reader_channel = channel.clone();
    tokio::spawn(async move {
        let cause = read_envelopes(reader, reader_channel).await;
        let reason = match cause {
            TerminationCause::Transport(reason) => Some(reason),
            _ => None,
        };
        // A newer connection may already own the state
        state.send_if_modified(|current| {
            if current.is_connected() && current.generation() == generation {
                *current = ConnectionState::Disconnected { generation, reason };
                true
            } else {
                false
            }
        });
    });

    Ok(channel)
}
