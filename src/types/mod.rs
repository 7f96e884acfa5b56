//! Value types that flow through robolink streams.
//!
//! - [`Frame`] / [`DecodedFrame`]: compressed camera frames and their RGB decode
//! - [`ImuSample`]: fixed-arity IMU axis vectors
//! - [`MotorCurrentSample`]: packed `u64` motor current readings with an explicit byte view
//! - [`MotorCommand`]: per-channel actuation values sent back to the robot
//! - [`StreamKind`] / [`DropPolicy`]: stream identity and overflow behavior

mod frame;
mod imu;
mod motor;
mod stream_kind;

pub use frame::{DecodedFrame, Frame};
pub use imu::ImuSample;
pub use motor::{ByteOrder, MOTOR_CURRENT_BYTE_ORDER, MotorCommand, MotorCurrentSample};
pub use stream_kind::{DropPolicy, StreamKind};
