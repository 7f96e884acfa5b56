//! Robot-side server
//!
//! ```text
//! SensorSource ──► Driver ──► StreamProducer ──► per-call queue ──► socket
//!                                                                     │
//! ActuatorSink ◄── latest-wins command queue ◄────────────────────────┘
//! ```

mod producer;
mod service;

pub use producer::{OutboundStream, ProducerStats, StreamProducer};
pub use service::{ServerHandle, TelemetryServer};
