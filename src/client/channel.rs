//! One live connection and the calls multiplexed over it

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::TerminationCause;
use crate::stream::DropQueue;
use crate::wire::{Ack, Body, CallId, Envelope, Operation, Outgoing, Payload, WireCodec};
use crate::{LinkError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client-side state of one call.
pub(crate) struct CallSlot {
    operation: Operation,
    inbound: DropQueue<Payload>,
    end: Mutex<Option<TerminationCause>>,
    ack: Mutex<Option<Ack>>,
    last_seq: AtomicU64,
    gaps: AtomicU64,
}

impl CallSlot {
    fn new(operation: Operation, config: &LinkConfig) -> Self {
        Self {
            operation,
            inbound: DropQueue::with_config(config.streams.for_kind(operation.kind())),
            end: Mutex::new(None),
            ack: Mutex::new(None),
            last_seq: AtomicU64::new(0),
            gaps: AtomicU64::new(0),
        }
    }

    fn deliver(&self, seq: u64, payload: Payload) {
        let last = self.last_seq.swap(seq, Ordering::Relaxed);
        if seq > last + 1 {
            let missing = seq - last - 1;
            self.gaps.fetch_add(missing, Ordering::Relaxed);
            debug!(op = self.operation.name(), last, seq, "Server dropped {} values", missing);
        }
        if self.inbound.push(payload).dropped() {
            trace!(op = self.operation.name(), seq, "Inbound queue overflow");
        }
    }

    /// Record why the call ended; the first cause wins.
    pub(crate) fn finish(&self, cause: TerminationCause) {
        {
            let mut end = lock(&self.end);
            if end.is_none() {
                *end = Some(cause);
            }
        }
        self.inbound.close();
    }

    fn complete(&self, ack: Ack) {
        *lock(&self.ack) = Some(ack);
        self.finish(TerminationCause::ServerEnded);
    }

    pub(crate) fn operation(&self) -> Operation {
        self.operation
    }

    pub(crate) fn end_cause(&self) -> Option<TerminationCause> {
        lock(&self.end).clone()
    }

    pub(crate) fn is_finished(&self) -> bool {
        lock(&self.end).is_some()
    }

    /// Next inbound payload; `None` once the call ended and is drained.
    pub(crate) async fn next_payload(&self) -> Option<Payload> {
        self.inbound.pop().await
    }

    /// Wait for the call to end, discarding anything still queued.
    pub(crate) async fn closed(&self) {
        while self.inbound.pop().await.is_some() {}
    }

    pub(crate) fn take_ack(&self) -> Option<Ack> {
        lock(&self.ack).take()
    }

    /// Values lost in transit: server-side gaps plus local overflow
    pub(crate) fn missed(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed) + self.inbound.dropped()
    }
}

struct ChannelInner {
    generation: u64,
    config: Arc<LinkConfig>,
    outbound: mpsc::Sender<Outgoing>,
    calls: Mutex<HashMap<CallId, Arc<CallSlot>>>,
    next_call: AtomicU32,
    failure: Mutex<Option<TerminationCause>>,
    closed: CancellationToken,
}

/// Handle to one established connection.
///
/// Cheap to clone. Every stream opened through the same channel shares its
/// socket; once the channel closes, every open stream ends.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("generation", &self.inner.generation)
            .field("address", &self.inner.config.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        generation: u64,
        config: Arc<LinkConfig>,
        outbound: mpsc::Sender<Outgoing>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                generation,
                config,
                outbound,
                calls: Mutex::new(HashMap::new()),
                next_call: AtomicU32::new(1),
                failure: Mutex::new(None),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Which connection attempt produced this channel
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Calls currently open
    pub fn open_calls(&self) -> usize {
        lock(&self.inner.calls).len()
    }

    /// Close the connection. Every open call ends with
    /// [`TerminationCause::ConnectionClosed`].
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    fn not_connected(&self) -> LinkError {
        LinkError::connection_failed(self.inner.config.address.clone(), "connection is closed")
    }

    async fn enqueue(&self, outgoing: Outgoing) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => Err(self.not_connected()),
            sent = self.inner.outbound.send(outgoing) => sent.map_err(|_| self.not_connected()),
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.enqueue(envelope.into()).await
    }

    /// Queue an envelope; the receiver resolves once the writer is done with it.
    async fn send_tracked(&self, envelope: Envelope) -> Result<oneshot::Receiver<()>> {
        let (outgoing, written) = Outgoing::tracked(envelope);
        self.enqueue(outgoing).await?;
        Ok(written)
    }

    /// Start a call and register its inbound slot.
    pub(crate) async fn open_call(&self, operation: Operation) -> Result<CallGuard> {
        if self.is_closed() {
            return Err(self.not_connected());
        }
        let call = CallId(self.inner.next_call.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(CallSlot::new(operation, &self.inner.config));
        lock(&self.inner.calls).insert(call, Arc::clone(&slot));

        let guard = CallGuard { channel: self.clone(), call, slot, seq: 0 };
        self.send(Envelope::open(call, operation)).await?;
        debug!(%call, op = operation.name(), "Call opened");
        Ok(guard)
    }

    /// Forget a call, telling the server to stop it if it is still running.
    pub(crate) fn release(&self, call: CallId) {
        let removed = lock(&self.inner.calls).remove(&call);
        let Some(slot) = removed else {
            return;
        };
        if slot.is_finished() || self.is_closed() {
            return;
        }
        slot.finish(TerminationCause::Cancelled);

        match self.inner.outbound.try_send(Envelope::cancel(call).into()) {
            Ok(()) => debug!(%call, "Call cancelled"),
            Err(TrySendError::Full(outgoing)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let outbound = self.inner.outbound.clone();
                    runtime.spawn(async move {
                        let _ = outbound.send(outgoing).await;
                    });
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub(super) fn dispatch(&self, envelope: Envelope) {
        let slot = lock(&self.inner.calls).get(&envelope.call).cloned();
        let Some(slot) = slot else {
            trace!(call = %envelope.call, "Message for a released call");
            return;
        };

        match envelope.body {
            Body::Item { seq, payload } => slot.deliver(seq, payload),
            Body::End => slot.finish(TerminationCause::ServerEnded),
            Body::Error(reason) => {
                warn!(call = %envelope.call, "Server failed call: {}", reason);
                slot.finish(TerminationCause::Remote(reason));
            }
            Body::Ack(ack) => slot.complete(ack),
            Body::Open(_) | Body::HalfClose | Body::Cancel => {
                warn!(call = %envelope.call, "Server sent a client-only message");
            }
        }
    }

    /// End every open call and close the channel.
    ///
    /// The first cause recorded wins: a writer failure reported here is not
    /// overwritten by the reader noticing the close it triggers. Returns the
    /// cause every call ended with.
    pub(super) fn fail_all(&self, cause: TerminationCause) -> TerminationCause {
        let cause = lock(&self.inner.failure).get_or_insert(cause).clone();
        self.close();
        let slots: Vec<_> = lock(&self.inner.calls).drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.finish(cause.clone());
        }
        cause
    }
}

/// Owns a call on behalf of a subscription or publisher. Dropping it releases
/// the call, cancelling it on the server if it has not ended.
pub(crate) struct CallGuard {
    channel: Channel,
    call: CallId,
    slot: Arc<CallSlot>,
    seq: u64,
}

impl CallGuard {
    pub(crate) fn call(&self) -> CallId {
        self.call
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn slot(&self) -> &Arc<CallSlot> {
        &self.slot
    }

    /// Send one item; the receiver resolves once it left the writer.
    pub(crate) async fn send_item(&mut self, payload: Payload) -> Result<oneshot::Receiver<()>> {
        self.seq += 1;
        self.channel.send_tracked(Envelope::item(self.call, self.seq, payload)).await
    }

    pub(crate) async fn half_close(&self) -> Result<()> {
        self.channel.send(Envelope::new(self.call, Body::HalfClose)).await
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.channel.release(self.call);
    }
}

/// Demultiplexes inbound envelopes into call slots until the connection ends.
///
/// Deliveries never wait, so a stream nobody reads cannot hold up the others.
pub(crate) async fn read_envelopes(
    mut reader: FramedRead<OwnedReadHalf, WireCodec>,
    channel: Channel,
) -> TerminationCause {
    let closed = channel.closed_token();
    let cause = loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break TerminationCause::ConnectionClosed,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(envelope)) => channel.dispatch(envelope),
            Some(Err(e)) => {
                warn!("Connection read failed: {}", e);
                break TerminationCause::Transport(e.to_string());
            }
            None => {
                info!("Server closed the connection");
                break TerminationCause::ConnectionClosed;
            }
        }
    };

    let cause = channel.fail_all(cause);
    debug!(
        generation = channel.generation(),
        malformed = reader.decoder().malformed(),
        "Connection reader stopped: {}",
        cause
    );
    cause
}
