//! Driver spawns and manages sensor acquisition tasks

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::codec::IntoPayload;
use crate::server::StreamProducer;
use crate::source::SensorSource;
use crate::types::StreamKind;

/// Consecutive source errors tolerated before the driver gives up
const MAX_ERRORS: u32 = 10;

/// Handle to a running acquisition task
pub struct DriverHandle {
    kind: StreamKind,
    cancel: CancellationToken,
    join: JoinHandle<u64>,
}

impl DriverHandle {
    /// Stream kind the source feeds
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Ask the task to stop after the current read.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task, returning how many values it published.
    pub async fn join(self) -> u64 {
        match self.join.await {
            Ok(published) => published,
            Err(e) => {
                error!(kind = %self.kind, "Driver task failed: {}", e);
                0
            }
        }
    }
}

/// Driver spawns and manages sensor acquisition tasks
///
/// Each task owns one [`SensorSource`] and publishes every value it yields into
/// the [`StreamProducer`]. Transient source errors are retried with backoff.
pub struct Driver;

impl Driver {
    /// Spawn an acquisition task for the given source
    pub fn spawn<S>(source: S, producer: StreamProducer) -> DriverHandle
    where
        S: SensorSource,
    {
        let kind = <S::Value as IntoPayload>::KIND;
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        let join = tokio::spawn(async move {
            Self::acquisition_task(source, producer, cancel_task).await
        });

        DriverHandle { kind, cancel, join }
    }

    /// Acquisition task - reads values and publishes them
    async fn acquisition_task<S>(
        mut source: S,
        producer: StreamProducer,
        cancel: CancellationToken,
    ) -> u64
    where
        S: SensorSource,
    {
        let kind = <S::Value as IntoPayload>::KIND;
        info!(%kind, "Acquisition task started");
        let mut published = 0u64;
        let mut error_count = 0u32;

        loop {
            // Use select to allow cancellation during source.next_value()
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(%kind, "Acquisition cancelled");
                    break;
                }
                result = source.next_value() => result,
            };

            match result {
                Ok(Some(value)) => {
                    published += 1;
                    error_count = 0;
                    let streams = producer.publish(value);
                    trace!(%kind, published, streams, "Value published");
                }
                Ok(None) => {
                    info!(%kind, "Source ended after {} values", published);
                    producer.finish(kind);
                    break;
                }
                Err(e) => {
                    // Source error - don't crash on transient failures
                    error_count += 1;
                    error!(%kind, "Source error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!(%kind, "Too many source errors, finishing stream");
                        producer.finish(kind);
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    debug!(%kind, "Retrying source in {:?}", backoff);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(%kind, "Acquisition task ended (published {} values)", published);
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamsConfig;
    use crate::types::{ImuSample, MotorCurrentSample};
    use crate::wire::Payload;
    use crate::{LinkError, Result};

    struct ScriptedSource<T> {
        script: Vec<Result<Option<T>>>,
    }

    #[async_trait::async_trait]
    impl<T: IntoPayload> SensorSource for ScriptedSource<T> {
        type Value = T;

        async fn next_value(&mut self) -> Result<Option<T>> {
            if self.script.is_empty() {
                return Ok(None);
            }
            self.script.remove(0)
        }
    }

    #[tokio::test]
    async fn publishes_until_source_ends() {
        let producer = StreamProducer::new(StreamsConfig::default());
        let stream = producer.subscribe(StreamKind::Imu);

        let source = ScriptedSource {
            script: vec![
                Ok(Some(ImuSample::from([1.0, 0.0, 9.8]))),
                Ok(Some(ImuSample::from([1.1, 0.0, 9.7]))),
            ],
        };
        let handle = Driver::spawn(source, producer.clone());
        assert_eq!(handle.kind(), StreamKind::Imu);
        assert_eq!(handle.join().await, 2);

        let mut seen = Vec::new();
        while let Some(payload) = stream.next().await {
            match payload {
                Payload::Imu(message) => seen.push(message.values),
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert_eq!(seen, vec![vec![1.0, 0.0, 9.8], vec![1.1, 0.0, 9.7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let producer = StreamProducer::new(StreamsConfig::default());
        let stream = producer.subscribe(StreamKind::MotorCurrent);

        let source = ScriptedSource {
            script: vec![
                Err(LinkError::protocol("bus glitch")),
                Ok(Some(MotorCurrentSample::from_raw(7))),
            ],
        };
        assert_eq!(Driver::spawn(source, producer).join().await, 1);
        assert_eq!(
            stream.next().await,
            Some(Payload::MotorCurrent(crate::wire::MotorCurrentMessage { value: 7 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_errors_finish_the_stream() {
        let producer = StreamProducer::new(StreamsConfig::default());
        let stream = producer.subscribe(StreamKind::Imu);

        let script = (0..MAX_ERRORS).map(|_| Err(LinkError::protocol("sensor offline"))).collect();
        let source: ScriptedSource<ImuSample> = ScriptedSource { script };
        assert_eq!(Driver::spawn(source, producer).join().await, 0);
        assert!(stream.next().await.is_none());
    }

    struct EndlessSource;

    #[async_trait::async_trait]
    impl SensorSource for EndlessSource {
        type Value = ImuSample;

        async fn next_value(&mut self) -> Result<Option<ImuSample>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Some(ImuSample::from([0.0, 0.0, 9.8])))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_blocked_read() {
        let producer = StreamProducer::new(StreamsConfig::default());
        let handle = Driver::spawn(EndlessSource, producer);
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.stop();
        let published = handle.join().await;
        assert!(published >= 1, "published {published}");
    }
}
