//! Operator-side client
//!
//! A [`ConnectionManager`] owns the one connection to the robot and hands out
//! [`Channel`]s. Telemetry is read through a [`StreamConsumer`], commands are
//! written through a [`CommandPublisher`]. All of them share the channel's
//! socket; each stream is its own call with its own queue.

mod channel;
mod connection;
mod consumer;
mod publisher;
mod subscription;

#[cfg(test)]
mod tests;

pub use channel::Channel;
pub use connection::{ConnectionManager, ConnectionState};
pub use consumer::StreamConsumer;
pub use publisher::CommandPublisher;
pub use subscription::{CancelHandle, Subscription};
