//! Robot-side connection handling

use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::producer::{OutboundStream, StreamProducer};
use crate::codec::{CommandDecoder, PayloadDecoder};
use crate::config::LinkConfig;
use crate::source::ActuatorSink;
use crate::stream::DropQueue;
use crate::types::StreamKind;
use crate::wire::{
    Ack, Body, CallId, Envelope, Operation, Outgoing, Payload, WireCodec, write_envelopes,
};
use crate::{LinkError, Result};

struct ServerContext {
    config: LinkConfig,
    producer: StreamProducer,
    actuator: Arc<dyn ActuatorSink>,
}

/// Serves the four operations to operator connections.
///
/// Telemetry comes from a shared [`StreamProducer`]; commands go to an
/// [`ActuatorSink`]. Every call runs in its own task, so cancelling or stalling
/// one call never affects another.
pub struct TelemetryServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    cancel: CancellationToken,
}

impl TelemetryServer {
    /// Bind the configured address.
    pub async fn bind<A>(config: LinkConfig, producer: StreamProducer, actuator: A) -> Result<Self>
    where
        A: ActuatorSink,
    {
        config.validate()?;
        let listener = TcpListener::bind(config.address.as_str()).await.map_err(|e| {
            LinkError::connection_failed_with_source(config.address.clone(), "bind failed", Box::new(e))
        })?;
        info!("Telemetry server listening on {}", listener.local_addr()?);

        let actuator: Arc<dyn ActuatorSink> = Arc::new(actuator);
        Ok(Self {
            listener,
            context: Arc::new(ServerContext { config, producer, actuator }),
            cancel: CancellationToken::new(),
        })
    }

    /// Bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the accept loop and every connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept connections until shut down.
    pub async fn run(self) -> Result<()> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = Arc::clone(&self.context);
                        let cancel = self.cancel.child_token();
                        connections.spawn(serve_connection(stream, peer, context, cancel));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("Telemetry server shutting down ({} open connections)", connections.len());
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    /// Run on a background task.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run());
        Ok(ServerHandle { local_addr, cancel, join })
    }
}

/// Handle to a server running on a background task
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the server task to finish.
    pub async fn join(self) -> Result<()> {
        self.join.await.map_err(|e| LinkError::Io(std::io::Error::other(e)))?
    }

    /// Shut down and wait.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.join().await
    }
}

struct ServerCall {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    commands: Option<Arc<DropQueue<Payload>>>,
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    info!(%peer, "Operator connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "Could not disable Nagle: {}", e);
    }

    let max = context.config.max_message_bytes;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, WireCodec::new(max));
    let (outbound, outbound_rx) = mpsc::channel(context.config.outbound_buffer);
    let writer = {
        let cancel = cancel.clone();
        let sink = FramedWrite::new(write_half, WireCodec::new(max));
        tokio::spawn(async move {
            if let Err(e) = write_envelopes(sink, outbound_rx, cancel.clone()).await {
                warn!(%peer, "Connection write failed: {}", e);
                cancel.cancel();
            }
        })
    };

    let mut calls: HashMap<CallId, ServerCall> = HashMap::new();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(envelope)) => {
                handle_envelope(envelope, &mut calls, &context, &outbound, &cancel).await;
            }
            Some(Err(e)) => {
                warn!(%peer, "Connection read failed: {}", e);
                break;
            }
            None => {
                debug!(%peer, "Operator closed the connection");
                break;
            }
        }
        calls.retain(|_, call| !call.task.is_finished());
    }

    cancel.cancel();
    for call in calls.into_values() {
        call.cancel.cancel();
        let _ = call.task.await;
    }
    drop(outbound);
    let _ = writer.await;
    info!(%peer, "Operator disconnected ({} malformed envelopes)", reader.decoder().malformed());
}

async fn handle_envelope(
    envelope: Envelope,
    calls: &mut HashMap<CallId, ServerCall>,
    context: &Arc<ServerContext>,
    outbound: &mpsc::Sender<Outgoing>,
    connection: &CancellationToken,
) {
    let call = envelope.call;
    match envelope.body {
        Body::Open(operation) => {
            if calls.contains_key(&call) {
                warn!(%call, "Call opened twice");
                let error = Envelope::new(call, Body::Error(format!("call {} is already open", call)));
                let _ = outbound.send(error.into()).await;
                return;
            }
            let cancel = connection.child_token();
            let server_call = if operation.is_client_streaming() {
                let commands = Arc::new(DropQueue::with_config(
                    context.config.streams.for_kind(StreamKind::MotorCommand),
                ));
                let task = tokio::spawn(command_call(
                    call,
                    Arc::clone(&commands),
                    Arc::clone(context),
                    outbound.clone(),
                    cancel.clone(),
                ));
                ServerCall { cancel, task, commands: Some(commands) }
            } else {
                let stream = context.producer.subscribe(operation.kind());
                let task = tokio::spawn(telemetry_call(
                    call,
                    operation,
                    stream,
                    outbound.clone(),
                    cancel.clone(),
                ));
                ServerCall { cancel, task, commands: None }
            };
            debug!(%call, op = operation.name(), "Call opened");
            calls.insert(call, server_call);
        }
        Body::Item { seq, payload } => {
            match calls.get(&call).and_then(|c| c.commands.as_ref()) {
                Some(commands) => {
                    let outcome = commands.push(payload);
                    trace!(%call, seq, ?outcome, "Command received");
                }
                None => warn!(%call, seq, "Item for a call that is not a command stream"),
            }
        }
        Body::HalfClose => match calls.get(&call).and_then(|c| c.commands.as_ref()) {
            Some(commands) => commands.close(),
            None => warn!(%call, "Half-close for a call that is not a command stream"),
        },
        Body::Cancel => {
            if let Some(server_call) = calls.remove(&call) {
                debug!(%call, "Call cancelled by operator");
                server_call.cancel.cancel();
            }
        }
        Body::End | Body::Ack(_) | Body::Error(_) => {
            warn!(%call, "Operator sent a server-only message");
        }
    }
}

/// Server-streaming call: forwards the producer's values with sequence numbers.
async fn telemetry_call(
    call: CallId,
    operation: Operation,
    stream: OutboundStream,
    outbound: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
) {
    let mut seq = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        let envelope = match next {
            Some(payload) => {
                seq += 1;
                Envelope::item(call, seq, payload)
            }
            None => Envelope::new(call, Body::End),
        };
        let terminal = envelope.is_terminal();

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = outbound.send(envelope.into()) => sent.is_ok(),
        };
        if !sent || terminal {
            break;
        }
    }
    debug!(
        %call,
        op = operation.name(),
        sent = seq,
        dropped = stream.dropped(),
        "Telemetry call finished"
    );
}

enum NextCommand {
    Command(Payload),
    HalfClosed,
    Idle,
}

async fn next_command(commands: &DropQueue<Payload>, flush: Option<Duration>) -> NextCommand {
    let next = match flush {
        Some(interval) => match tokio::time::timeout(interval, commands.pop()).await {
            Ok(next) => next,
            Err(_) => return NextCommand::Idle,
        },
        None => commands.pop().await,
    };
    next.map_or(NextCommand::HalfClosed, NextCommand::Command)
}

/// Client-streaming call: actuates the latest command, acks on close.
async fn command_call(
    call: CallId,
    commands: Arc<DropQueue<Payload>>,
    context: Arc<ServerContext>,
    outbound: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
) {
    let decoder = CommandDecoder::new(context.config.motor_channels);
    let flush = context.config.command_flush_interval();
    let mut ack = Ack::default();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%call, applied = ack.applied, "Command stream cancelled");
                return;
            }
            next = next_command(&commands, flush) => next,
        };

        match next {
            NextCommand::Command(payload) => match decoder.decode(payload) {
                Ok(command) => match context.actuator.apply(command).await {
                    Ok(()) => ack.applied += 1,
                    Err(e) => {
                        warn!(%call, "Actuator rejected command: {}", e);
                        ack.rejected += 1;
                    }
                },
                Err(e) => {
                    warn!(%call, "Invalid command: {}", e);
                    ack.rejected += 1;
                }
            },
            NextCommand::HalfClosed => break,
            NextCommand::Idle => {
                debug!(%call, "No command within flush interval, acknowledging");
                commands.close();
                break;
            }
        }
    }

    ack.superseded = commands.dropped();
    info!(
        %call,
        applied = ack.applied,
        rejected = ack.rejected,
        superseded = ack.superseded,
        "Command stream acknowledged"
    );
    let _ = outbound.send(Envelope::new(call, Body::Ack(ack)).into()).await;
}
