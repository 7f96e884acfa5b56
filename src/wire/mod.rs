//! Wire contract and framing
//!
//! # Framing
//!
//! All calls share one TCP connection. Every message is an [`Envelope`] encoded
//! with postcard and prefixed by its length:
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────┐
//! │ Length (4 bytes) │ Envelope (postcard)           │
//! │ Big-endian u32   │ call id + body                │
//! └──────────────────┴───────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Direction | Items |
//! |-----------|-----------|-------|
//! | `StreamImage` | robot → operator | [`ImageMessage`] |
//! | `StreamImu` | robot → operator | [`ImuMessage`] |
//! | `StreamMotorCurrentTelemetry` | robot → operator | [`MotorCurrentMessage`] |
//! | `StreamMotorCommand` | operator → robot | [`MotorCommandMessage`], answered by one [`Ack`] |
//!
//! # Call Lifecycle
//!
//! ```text
//! client                               server
//!   Open(op)            ──────────►    start call
//!                       ◄──────────    Item{seq, payload} ...
//!   Cancel              ──────────►    stop this call only
//!                       ◄──────────    End | Error(reason)
//!
//!   Open(StreamMotorCommand) ─────►
//!   Item{seq, command} ...   ─────►    actuate (latest wins)
//!   HalfClose                ─────►
//!                       ◄──────────    Ack{applied, rejected, superseded}
//! ```
//!
//! A malformed envelope is logged and discarded; the connection stays open.

mod framing;
mod messages;

pub use framing::WireCodec;
pub(crate) use framing::{Outgoing, write_envelopes};
pub use messages::{
    Ack, Body, CallId, Envelope, ImageMessage, ImuMessage, MotorCommandMessage,
    MotorCurrentMessage, Operation, Payload,
};
