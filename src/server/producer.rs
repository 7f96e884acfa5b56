//! Fan-out of sensor values into per-subscription queues

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace};

use crate::codec::IntoPayload;
use crate::config::StreamsConfig;
use crate::stream::DropQueue;
use crate::types::{Frame, ImuSample, MotorCurrentSample, StreamKind};
use crate::wire::Payload;

/// Counters for one telemetry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerStats {
    /// Values handed to [`StreamProducer::publish`]
    pub published: u64,
    /// Values lost to queue overflow, summed over subscribers
    pub dropped: u64,
    /// Streams currently subscribed
    pub subscribers: usize,
}

#[derive(Default)]
struct KindCounters {
    published: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<StreamKind, Vec<(u64, Arc<DropQueue<Payload>>)>>,
    finished: HashSet<StreamKind>,
}

struct ProducerInner {
    streams: StreamsConfig,
    registry: Mutex<Registry>,
    counters: HashMap<StreamKind, KindCounters>,
    next_id: AtomicU64,
}

impl ProducerInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, kind: StreamKind, id: u64) {
        let mut registry = self.registry();
        if let Some(queues) = registry.subscribers.get_mut(&kind) {
            queues.retain(|(queue_id, _)| *queue_id != id);
        }
    }
}

/// Server-side hub that turns pushed sensor values into outbound streams.
///
/// Each subscribed call gets its own bounded queue, so a slow stream only ever
/// loses its own values. Publishing never blocks.
///
/// ```rust
/// use robolink::{StreamProducer, StreamsConfig, ImuSample};
///
/// let producer = StreamProducer::new(StreamsConfig::default());
/// // no subscribers yet, so nothing is queued
/// assert_eq!(producer.publish(ImuSample::from([0.0, 0.0, 9.8])), 0);
/// ```
#[derive(Clone)]
pub struct StreamProducer {
    inner: Arc<ProducerInner>,
}

impl StreamProducer {
    pub fn new(streams: StreamsConfig) -> Self {
        let counters =
            StreamKind::TELEMETRY.iter().map(|kind| (*kind, KindCounters::default())).collect();
        Self {
            inner: Arc::new(ProducerInner {
                streams,
                registry: Mutex::new(Registry::default()),
                counters,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Push a value to every open stream of its kind.
    ///
    /// Returns how many streams received it; values published while nobody is
    /// subscribed are discarded.
    pub fn publish<T: IntoPayload>(&self, value: T) -> usize {
        let kind = T::KIND;
        let payload = value.into_payload();

        let mut delivered = 0;
        let mut dropped = 0;
        {
            let registry = self.inner.registry();
            if let Some(queues) = registry.subscribers.get(&kind) {
                for (_, queue) in queues {
                    let outcome = queue.push(payload.clone());
                    if outcome.dropped() {
                        dropped += 1;
                    }
                    delivered += 1;
                }
            }
        }

        if let Some(counters) = self.inner.counters.get(&kind) {
            let published = counters.published.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped > 0 {
                let total = counters.dropped.fetch_add(dropped, Ordering::Relaxed) + dropped;
                trace!(%kind, published, dropped = total, "Queue overflow");
                if total % 100 == 0 {
                    debug!(%kind, dropped = total, "Slow consumer is losing values");
                }
            }
        }
        delivered
    }

    pub fn publish_frame(&self, frame: Frame) -> usize {
        self.publish(frame)
    }

    pub fn publish_imu(&self, sample: ImuSample) -> usize {
        self.publish(sample)
    }

    pub fn publish_motor_current(&self, sample: MotorCurrentSample) -> usize {
        self.publish(sample)
    }

    /// Open a new outbound stream for a telemetry kind.
    ///
    /// If the kind's source already finished, the stream ends immediately.
    pub fn subscribe(&self, kind: StreamKind) -> OutboundStream {
        let queue = Arc::new(DropQueue::with_config(self.inner.streams.for_kind(kind)));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.inner.registry();
        if registry.finished.contains(&kind) {
            queue.close();
        } else {
            registry.subscribers.entry(kind).or_default().push((id, Arc::clone(&queue)));
        }
        drop(registry);

        debug!(%kind, id, "Outbound stream subscribed");
        OutboundStream { id, kind, queue, producer: Arc::downgrade(&self.inner) }
    }

    /// End every stream of a kind once its queued values are sent.
    pub fn finish(&self, kind: StreamKind) {
        let queues = {
            let mut registry = self.inner.registry();
            registry.finished.insert(kind);
            registry.subscribers.remove(&kind).unwrap_or_default()
        };
        info!(%kind, streams = queues.len(), "Telemetry source finished");
        for (_, queue) in queues {
            queue.close();
        }
    }

    /// Finish every telemetry kind.
    pub fn shutdown(&self) {
        for kind in StreamKind::TELEMETRY {
            self.finish(kind);
        }
    }

    pub fn subscriber_count(&self, kind: StreamKind) -> usize {
        self.inner.registry().subscribers.get(&kind).map_or(0, Vec::len)
    }

    pub fn stats(&self, kind: StreamKind) -> ProducerStats {
        let subscribers = self.subscriber_count(kind);
        self.inner
            .counters
            .get(&kind)
            .map(|c| ProducerStats {
                published: c.published.load(Ordering::Relaxed),
                dropped: c.dropped.load(Ordering::Relaxed),
                subscribers,
            })
            .unwrap_or_default()
    }
}

/// One subscriber's queue. Dropping it unsubscribes.
pub struct OutboundStream {
    id: u64,
    kind: StreamKind,
    queue: Arc<DropQueue<Payload>>,
    producer: Weak<ProducerInner>,
}

impl OutboundStream {
    /// Next payload in publish order, or `None` once the source finished.
    pub async fn next(&self) -> Option<Payload> {
        self.queue.pop().await
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Values this stream lost to overflow
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.upgrade() {
            producer.remove(self.kind, self.id);
        }
        trace!(kind = %self.kind, id = self.id, "Outbound stream released");
    }
}
