//! Motor current decoding and motor command encoding

use super::{IntoPayload, PayloadDecoder, wrong_payload};
use crate::types::{MotorCommand, MotorCurrentSample, StreamKind};
use crate::wire::{MotorCommandMessage, MotorCurrentMessage, Payload};
use crate::{LinkError, Result};

/// Reinterpret a motor current message; the value is carried bit for bit.
pub fn decode_motor_current(message: MotorCurrentMessage) -> MotorCurrentSample {
    MotorCurrentSample::from_raw(message.value)
}

/// Serialize a command for `StreamMotorCommand`.
///
/// Rejects non-finite channel values so a NaN never reaches a motor driver.
pub fn encode_command(command: &MotorCommand) -> Result<MotorCommandMessage> {
    if command.channels() == 0 {
        return Err(LinkError::InvalidCommand { details: "command has no channels".to_string() });
    }
    if let Some(index) = command.values().iter().position(|v| !v.is_finite()) {
        return Err(LinkError::InvalidCommand {
            details: format!("channel {} is not finite", index),
        });
    }
    Ok(MotorCommandMessage { values: command.values().to_vec() })
}

/// Server-side inverse of [`encode_command`], enforcing the channel count.
pub fn decode_command(message: MotorCommandMessage, channels: usize) -> Result<MotorCommand> {
    if message.values.len() != channels {
        return Err(LinkError::SchemaMismatch {
            kind: StreamKind::MotorCommand,
            expected: channels,
            found: message.values.len(),
        });
    }
    let command = MotorCommand::new(message.values);
    // same checks as the sending side
    encode_command(&command)?;
    Ok(command)
}

/// Decodes motor current payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorCurrentDecoder;

impl PayloadDecoder for MotorCurrentDecoder {
    type Output = MotorCurrentSample;

    fn kind(&self) -> StreamKind {
        StreamKind::MotorCurrent
    }

    fn decode(&self, payload: Payload) -> Result<MotorCurrentSample> {
        match payload {
            Payload::MotorCurrent(message) => Ok(decode_motor_current(message)),
            other => Err(wrong_payload(StreamKind::MotorCurrent, &other)),
        }
    }
}

/// Decodes command payloads on the server.
#[derive(Debug, Clone, Copy)]
pub struct CommandDecoder {
    channels: usize,
}

impl CommandDecoder {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl PayloadDecoder for CommandDecoder {
    type Output = MotorCommand;

    fn kind(&self) -> StreamKind {
        StreamKind::MotorCommand
    }

    fn decode(&self, payload: Payload) -> Result<MotorCommand> {
        match payload {
            Payload::MotorCommand(message) => decode_command(message, self.channels),
            other => Err(wrong_payload(StreamKind::MotorCommand, &other)),
        }
    }
}

impl IntoPayload for MotorCurrentSample {
    const KIND: StreamKind = StreamKind::MotorCurrent;

    fn into_payload(self) -> Payload {
        Payload::MotorCurrent(MotorCurrentMessage { value: self.raw() })
    }
}
