//! Bounded per-stream queue with a configurable overflow policy

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::types::DropPolicy;

/// Result of pushing into a [`DropQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without loss
    Queued,
    /// Stored after evicting the oldest buffered value
    EvictedOldest,
    /// Rejected because the queue was full
    RejectedNewest,
    /// Rejected because the queue is closed
    Closed,
}

impl PushOutcome {
    /// Whether a value was lost
    pub fn dropped(self) -> bool {
        matches!(self, PushOutcome::EvictedOldest | PushOutcome::RejectedNewest)
    }
}

/// A bounded single-consumer queue that never blocks its producer.
///
/// Values sit in a lock-free [`ArrayQueue`]. When full, a push either evicts
/// the oldest value (`force_push`) or is rejected (`push`), per the queue's
/// [`DropPolicy`]; every loss is counted. Closing the queue lets the consumer
/// drain what is left, then [`pop`](Self::pop) returns `None`.
pub struct DropQueue<T> {
    items: ArrayQueue<T>,
    closed: AtomicBool,
    ready: Notify,
    policy: DropPolicy,
    dropped: AtomicU64,
}

impl<T> DropQueue<T> {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self::new(config.capacity, config.drop_policy)
    }

    /// Enqueue without waiting.
    pub fn push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        let outcome = match self.policy {
            DropPolicy::DropOldest => match self.items.force_push(item) {
                None => PushOutcome::Queued,
                Some(_evicted) => PushOutcome::EvictedOldest,
            },
            DropPolicy::DropNewest => match self.items.push(item) {
                Ok(()) => PushOutcome::Queued,
                Err(_rejected) => PushOutcome::RejectedNewest,
            },
        };

        if outcome.dropped() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome != PushOutcome::RejectedNewest {
            self.ready.notify_one();
        }
        outcome
    }

    /// Wait for the next value. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            if let Some(item) = self.items.pop() {
                return Some(item);
            }
            if self.is_closed() {
                // a push may have landed between the pop and the close check
                return self.items.pop();
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    /// Stop accepting values and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    /// Values lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for DropQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn drain<T>(queue: &DropQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn drop_oldest_keeps_latest_values() {
        let queue = DropQueue::new(3, DropPolicy::DropOldest);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(drain(&queue), vec![2, 3, 4]);
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn drop_newest_keeps_buffered_values() {
        let queue = DropQueue::new(3, DropPolicy::DropNewest);
        let outcomes: Vec<_> = (0..5).map(|i| queue.push(i)).collect();
        assert_eq!(outcomes[2], PushOutcome::Queued);
        assert_eq!(outcomes[4], PushOutcome::RejectedNewest);
        assert_eq!(drain(&queue), vec![0, 1, 2]);
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = DropQueue::new(0, DropPolicy::DropOldest);
        assert_eq!(queue.capacity(), 1);
        queue.push("a");
        queue.push("b");
        assert_eq!(drain(&queue), vec!["b"]);
    }

    #[test]
    fn concurrent_producers_account_for_every_value() {
        let queue = Arc::new(DropQueue::new(8, DropPolicy::DropOldest));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(queue.len(), 8);
        assert_eq!(queue.len() as u64 + queue.dropped(), 1000);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = DropQueue::new(4, DropPolicy::DropOldest);
        queue.push(1);
        queue.push(2);
        queue.close();
        assert_eq!(queue.push(3), PushOutcome::Closed);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push_and_close() {
        let queue = Arc::new(DropQueue::new(4, DropPolicy::DropOldest));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(v) = queue.pop().await {
                    seen.push(v);
                }
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(7);
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(8);
        queue.close();

        let seen = tokio::time::timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(seen, vec![7, 8]);
    }
}
