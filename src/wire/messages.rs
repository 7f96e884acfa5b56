//! Message shapes carried inside envelopes

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::StreamKind;

/// Identifies one call within a connection. Allocated by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The four remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    StreamImage,
    StreamImu,
    StreamMotorCurrentTelemetry,
    StreamMotorCommand,
}

impl Operation {
    /// Kind of value the operation carries
    pub fn kind(self) -> StreamKind {
        match self {
            Operation::StreamImage => StreamKind::Image,
            Operation::StreamImu => StreamKind::Imu,
            Operation::StreamMotorCurrentTelemetry => StreamKind::MotorCurrent,
            Operation::StreamMotorCommand => StreamKind::MotorCommand,
        }
    }

    /// The server-streaming operation for a telemetry kind.
    pub fn for_telemetry(kind: StreamKind) -> Option<Operation> {
        match kind {
            StreamKind::Image => Some(Operation::StreamImage),
            StreamKind::Imu => Some(Operation::StreamImu),
            StreamKind::MotorCurrent => Some(Operation::StreamMotorCurrentTelemetry),
            StreamKind::MotorCommand => None,
        }
    }

    /// Whether the client is the sending side.
    pub fn is_client_streaming(self) -> bool {
        matches!(self, Operation::StreamMotorCommand)
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::StreamImage => "StreamImage",
            Operation::StreamImu => "StreamIMU",
            Operation::StreamMotorCurrentTelemetry => "StreamMotorCurrentTelemetry",
            Operation::StreamMotorCommand => "StreamMotorCommand",
        }
    }
}

/// One compressed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub data: Bytes,
}

/// One IMU sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuMessage {
    pub values: Vec<f32>,
}

/// One packed motor current reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCurrentMessage {
    pub value: u64,
}

/// One motor command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorCommandMessage {
    pub values: Vec<f32>,
}

/// Closing acknowledgement of a command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ack {
    /// Commands handed to the actuator
    pub applied: u64,
    /// Commands that failed validation or actuation
    pub rejected: u64,
    /// Commands overwritten by a newer one before they were actuated
    pub superseded: u64,
}

/// A streamed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Image(ImageMessage),
    Imu(ImuMessage),
    MotorCurrent(MotorCurrentMessage),
    MotorCommand(MotorCommandMessage),
}

impl Payload {
    pub fn kind(&self) -> StreamKind {
        match self {
            Payload::Image(_) => StreamKind::Image,
            Payload::Imu(_) => StreamKind::Imu,
            Payload::MotorCurrent(_) => StreamKind::MotorCurrent,
            Payload::MotorCommand(_) => StreamKind::MotorCommand,
        }
    }
}

/// What an envelope does to its call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Start a call (client → server)
    Open(Operation),
    /// One value; `seq` counts from 1 per call and per direction
    Item { seq: u64, payload: Payload },
    /// Client finished sending commands
    HalfClose,
    /// Client abandons the call
    Cancel,
    /// Server finished the stream normally
    End,
    /// Server acknowledges a command stream and ends the call
    Ack(Ack),
    /// Server failed the call
    Error(String),
}

/// Unit of framing: a body addressed to a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub call: CallId,
    pub body: Body,
}

impl Envelope {
    pub fn new(call: CallId, body: Body) -> Self {
        Self { call, body }
    }

    pub fn open(call: CallId, operation: Operation) -> Self {
        Self::new(call, Body::Open(operation))
    }

    pub fn item(call: CallId, seq: u64, payload: Payload) -> Self {
        Self::new(call, Body::Item { seq, payload })
    }

    pub fn cancel(call: CallId) -> Self {
        Self::new(call, Body::Cancel)
    }

    /// Whether this body ends the call from the server's side.
    pub fn is_terminal(&self) -> bool {
        matches!(self.body, Body::End | Body::Ack(_) | Body::Error(_))
    }
}
