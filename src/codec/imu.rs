//! IMU sample decoding

use super::{IntoPayload, PayloadDecoder, wrong_payload};
use crate::types::{ImuSample, StreamKind};
use crate::wire::{ImuMessage, Payload};
use crate::{LinkError, Result};

/// Decodes IMU messages, enforcing the agreed axis count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuDecoder {
    axes: usize,
}

impl ImuDecoder {
    pub fn new(axes: usize) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> usize {
        self.axes
    }

    /// Check arity and keep value order.
    pub fn decode_message(&self, message: ImuMessage) -> Result<ImuSample> {
        if message.values.len() != self.axes {
            return Err(LinkError::SchemaMismatch {
                kind: StreamKind::Imu,
                expected: self.axes,
                found: message.values.len(),
            });
        }
        Ok(ImuSample::new(message.values))
    }
}

impl PayloadDecoder for ImuDecoder {
    type Output = ImuSample;

    fn kind(&self) -> StreamKind {
        StreamKind::Imu
    }

    fn decode(&self, payload: Payload) -> Result<ImuSample> {
        match payload {
            Payload::Imu(message) => self.decode_message(message),
            other => Err(wrong_payload(StreamKind::Imu, &other)),
        }
    }
}

impl IntoPayload for ImuSample {
    const KIND: StreamKind = StreamKind::Imu;

    fn into_payload(self) -> Payload {
        Payload::Imu(ImuMessage { values: self.into_values() })
    }
}
