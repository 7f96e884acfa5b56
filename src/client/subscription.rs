//! Typed telemetry subscriptions

use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{CallGuard, CallSlot, Channel};
use crate::codec::PayloadDecoder;
use crate::error::TerminationCause;
use crate::types::StreamKind;
use crate::wire::{CallId, Payload};
use crate::{LinkError, Result};

struct Shared {
    kind: StreamKind,
    call: CallId,
    channel: Channel,
    slot: Arc<CallSlot>,
    cancel: CancellationToken,
    cause: Mutex<Option<TerminationCause>>,
    received: AtomicU64,
    skipped: AtomicU64,
}

impl Shared {
    fn record(&self, cause: TerminationCause) {
        let mut slot = self.cause.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!(
                call = %self.call,
                kind = %self.kind,
                received = self.received.load(Ordering::Relaxed),
                "Subscription ended: {}",
                cause
            );
            *slot = Some(cause);
        }
    }

    fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.channel.release(self.call);
        }
    }
}

/// Cancels a [`Subscription`] from another task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

/// A live telemetry stream of decoded values.
///
/// Yields values in the order the server produced them. A malformed payload is
/// logged and skipped. The stream ends without an error when it is cancelled,
/// the server finishes it, or the connection closes cleanly; it yields one
/// [`LinkError::StreamTerminated`] before ending when the idle timeout expires
/// or the transport fails, and one [`LinkError::SchemaMismatch`] or
/// [`LinkError::Protocol`] when payloads disagree with the stream's schema.
/// [`cause`](Self::cause) reports which.
///
/// Dropping the subscription cancels the server-side call.
pub struct Subscription<T> {
    inner: BoxStream<'static, Result<T>>,
    shared: Arc<Shared>,
}

enum Inbound {
    Payload(Payload),
    Ended,
    Idle(Duration),
    Cancelled,
}

struct Pump<D> {
    guard: CallGuard,
    decoder: D,
    idle_timeout: Option<Duration>,
    shared: Arc<Shared>,
    done: bool,
}

impl<D: PayloadDecoder> Pump<D> {
    async fn recv(&self) -> Inbound {
        let slot = self.guard.slot();
        let next = async {
            match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, slot.next_payload()).await {
                    Ok(Some(payload)) => Inbound::Payload(payload),
                    Ok(None) => Inbound::Ended,
                    Err(_) => Inbound::Idle(idle),
                },
                None => slot.next_payload().await.map_or(Inbound::Ended, Inbound::Payload),
            }
        };
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Inbound::Cancelled,
            inbound = next => inbound,
        }
    }

    fn end(&mut self, cause: TerminationCause) {
        self.done = true;
        self.shared.record(cause);
        // stop the server side now rather than when the stream is dropped
        self.guard.channel().release(self.guard.call());
    }

    async fn next(mut self) -> Option<(Result<D::Output>, Self)> {
        if self.done {
            return None;
        }
        loop {
            match self.recv().await {
                Inbound::Payload(payload) => match self.decoder.decode(payload) {
                    Ok(value) => {
                        self.shared.received.fetch_add(1, Ordering::Relaxed);
                        return Some((Ok(value), self));
                    }
                    Err(error @ LinkError::Decode { .. }) => {
                        let skipped = self.shared.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(call = %self.shared.call, skipped, "Skipping payload: {}", error);
                    }
                    Err(error) => {
                        warn!(call = %self.shared.call, "Ending stream: {}", error);
                        let cause = match &error {
                            LinkError::SchemaMismatch { .. } => TerminationCause::SchemaMismatch,
                            other => TerminationCause::Protocol(other.to_string()),
                        };
                        self.end(cause);
                        return Some((Err(error), self));
                    }
                },
                Inbound::Ended => {
                    let cause =
                        self.guard.slot().end_cause().unwrap_or(TerminationCause::ConnectionClosed);
                    self.end(cause.clone());
                    if cause.is_error() {
                        return Some((Err(LinkError::terminated(cause)), self));
                    }
                    return None;
                }
                Inbound::Idle(idle) => {
                    warn!(call = %self.shared.call, "No data for {:?}", idle);
                    let cause = TerminationCause::IdleTimeout(idle);
                    self.end(cause.clone());
                    return Some((Err(LinkError::terminated(cause)), self));
                }
                Inbound::Cancelled => {
                    self.end(TerminationCause::Cancelled);
                    return None;
                }
            }
        }
    }
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new<D>(guard: CallGuard, decoder: D, idle_timeout: Option<Duration>) -> Self
    where
        D: PayloadDecoder<Output = T>,
    {
        let shared = Arc::new(Shared {
            kind: decoder.kind(),
            call: guard.call(),
            channel: guard.channel().clone(),
            slot: Arc::clone(guard.slot()),
            cancel: CancellationToken::new(),
            cause: Mutex::new(None),
            received: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        });
        let pump = Pump { guard, decoder, idle_timeout, shared: Arc::clone(&shared), done: false };
        let inner = futures::stream::unfold(pump, Pump::next).boxed();
        Self { inner, shared }
    }
}

impl<T> Subscription<T> {
    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    /// Wire call carrying this stream
    pub fn call(&self) -> CallId {
        self.shared.call
    }

    /// Stop the stream and the server-side call. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { shared: Arc::clone(&self.shared) }
    }

    /// Why the stream ended, once it has.
    pub fn cause(&self) -> Option<TerminationCause> {
        self.shared.cause.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.cause().is_some()
    }

    /// Values delivered so far
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// Malformed payloads skipped
    pub fn skipped(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    /// Values lost to overflow, on either end
    pub fn missed(&self) -> u64 {
        self.shared.slot.missed()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.shared.kind)
            .field("call", &self.shared.call)
            .field("cause", &self.cause())
            .finish()
    }
}
