//! Telemetry subscriptions on the operator side

use std::time::Duration;

use super::channel::Channel;
use super::subscription::Subscription;
use crate::codec::{FrameDecoder, ImuDecoder, MotorCurrentDecoder, PayloadDecoder, RawFrameDecoder};
use crate::types::{DecodedFrame, Frame, ImuSample, MotorCurrentSample};
use crate::wire::Operation;
use crate::{LinkError, Result};

/// Opens telemetry streams on a channel.
///
/// Each call to a `stream_*` method opens an independent server call: two
/// subscriptions to the same kind each see every value, and cancelling one
/// leaves the others running.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    channel: Channel,
    imu: ImuDecoder,
    idle_timeout: Option<Duration>,
}

impl StreamConsumer {
    pub fn new(channel: Channel) -> Self {
        let config = channel.config();
        let imu = ImuDecoder::new(config.imu_axes);
        let idle_timeout = config.idle_timeout();
        Self { channel, imu, idle_timeout }
    }

    /// Override the idle timeout for streams opened from now on.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Camera frames decoded to RGB.
    pub async fn stream_image(&self) -> Result<Subscription<DecodedFrame>> {
        self.subscribe(Operation::StreamImage, FrameDecoder).await
    }

    /// Camera frames still JPEG-compressed.
    pub async fn stream_frames(&self) -> Result<Subscription<Frame>> {
        self.subscribe(Operation::StreamImage, RawFrameDecoder).await
    }

    pub async fn stream_imu(&self) -> Result<Subscription<ImuSample>> {
        self.subscribe(Operation::StreamImu, self.imu).await
    }

    pub async fn stream_motor_current(&self) -> Result<Subscription<MotorCurrentSample>> {
        self.subscribe(Operation::StreamMotorCurrentTelemetry, MotorCurrentDecoder).await
    }

    /// Open a telemetry operation with a custom decoder.
    pub async fn subscribe<D>(&self, operation: Operation, decoder: D) -> Result<Subscription<D::Output>>
    where
        D: PayloadDecoder,
    {
        if operation.is_client_streaming() {
            return Err(LinkError::protocol(format!("{} is not a telemetry stream", operation.name())));
        }
        if decoder.kind() != operation.kind() {
            return Err(LinkError::protocol(format!(
                "{} decoder cannot read {}",
                decoder.kind(),
                operation.name()
            )));
        }
        let guard = self.channel.open_call(operation).await?;
        Ok(Subscription::new(guard, decoder, self.idle_timeout))
    }
}
