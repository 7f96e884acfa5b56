//! Telemetry codec: typed values to and from wire payloads.
//!
//! Decoding is split by direction of travel:
//! - [`PayloadDecoder`] turns an inbound [`Payload`] into the value a consumer sees
//! - [`IntoPayload`] turns a producer's value into an outbound [`Payload`]
//!
//! Every function here is pure. Nothing touches the transport, so each decoder
//! can be tested on its own.

mod frame;
mod imu;
mod motor;

pub use self::frame::{FrameDecoder, RawFrameDecoder, decode_frame, encode_jpeg};
pub use self::imu::ImuDecoder;
pub use self::motor::{
    CommandDecoder, MotorCurrentDecoder, decode_command, decode_motor_current, encode_command,
};

use crate::Result;
use crate::types::StreamKind;
use crate::wire::Payload;

/// Decodes inbound payloads of one kind.
///
/// Implementations return [`LinkError::Decode`](crate::LinkError::Decode) for a
/// single bad payload, which consumers skip, and
/// [`LinkError::SchemaMismatch`](crate::LinkError::SchemaMismatch) for a
/// disagreement that will not go away, which ends the stream.
pub trait PayloadDecoder: Send + Sync + 'static {
    /// Decoded value handed to the application
    type Output: Send + 'static;

    /// Kind of payload this decoder accepts
    fn kind(&self) -> StreamKind;

    fn decode(&self, payload: Payload) -> Result<Self::Output>;
}

/// Values a producer can place on a stream.
pub trait IntoPayload: Send + 'static {
    /// Stream the value belongs to
    const KIND: StreamKind;

    fn into_payload(self) -> Payload;
}

/// Mismatched payload variant for a decoder's stream.
pub(crate) fn wrong_payload(expected: StreamKind, payload: &Payload) -> crate::LinkError {
    crate::LinkError::protocol(format!(
        "{} stream received a {} payload",
        expected,
        payload.kind()
    ))
}
