//! Rate limiting for subscription streams

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to rate-limit any stream of `Result`s.
pub trait ThrottleExt<T, E>: Stream<Item = Result<T, E>> {
    /// Emit at most one value per interval, keeping only the latest.
    ///
    /// Values that arrive within one interval replace each other. Errors are
    /// never replaced: an error is delivered right after any value still
    /// pending ahead of it. Meant for display sinks that cannot keep up with
    /// a camera or IMU rate.
    fn throttle(self, period: Duration) -> Throttle<Self, T, E>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<S, T, E> ThrottleExt<T, E> for S where S: Stream<Item = Result<T, E>> {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S, T, E> {
        #[pin]
        stream: S,
        interval: Interval,
        ticked: bool,
        pending: Option<T>,
        error: Option<E>,
        done: bool,
        superseded: u64,
    }
}

impl<S, T, E> Throttle<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    pub fn new(stream: S, period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            stream,
            interval,
            ticked: false,
            pending: None,
            error: None,
            done: false,
            superseded: 0,
        }
    }

    /// Values replaced by a newer one before they were emitted
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}

impl<S, T, E> Stream for Throttle<S, T, E>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain what is ready, keeping the latest value
        while !*this.done && this.error.is_none() {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.pending.replace(value).is_some() {
                        *this.superseded += 1;
                    }
                }
                Poll::Ready(Some(Err(error))) => *this.error = Some(error),
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if this.error.is_some() || *this.done {
            if let Some(value) = this.pending.take() {
                return Poll::Ready(Some(Ok(value)));
            }
            return Poll::Ready(this.error.take().map(Err));
        }

        if !*this.ticked && this.interval.poll_tick(cx).is_ready() {
            *this.ticked = true;
        }

        if *this.ticked {
            if let Some(value) = this.pending.take() {
                *this.ticked = false;
                return Poll::Ready(Some(Ok(value)));
            }
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn keeps_latest_value_per_interval() {
        let values = futures::stream::iter((0..10).map(Ok::<_, ()>));
        let out: Vec<_> = values.throttle(Duration::from_millis(20)).collect().await;
        // the source ends inside one interval, so the burst collapses to its last value
        assert_eq!(out, vec![Ok(9)]);
    }

    #[tokio::test]
    async fn errors_are_never_dropped() {
        let items = vec![Ok(1), Ok(2), Err("stalled")];
        let out: Vec<_> =
            futures::stream::iter(items).throttle(Duration::from_secs(60)).collect().await;
        assert_eq!(out, vec![Ok(2), Err("stalled")]);
    }

    #[tokio::test]
    async fn waits_for_slow_sources_instead_of_ending() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<u32, ()>>(4);
        let mut throttled = tokio_stream::wrappers::ReceiverStream::new(rx)
            .throttle(Duration::from_millis(5));

        let producer = tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tx.send(Ok(i)).await.unwrap();
            }
        });

        let mut seen = Vec::new();
        while let Some(item) = throttled.next().await {
            seen.push(item.unwrap());
        }
        producer.await.unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
