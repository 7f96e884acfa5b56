//! Streaming RPC bridge between a robot and an operator workstation.
//!
//! The robot runs a server that streams camera frames, IMU samples and motor
//! current readings; the operator's client consumes them and streams motor
//! commands back. Both ends share one TCP connection with every stream
//! multiplexed as an independent call.
//!
//! # Features
//!
//! - **Independent streams**: each call has its own bounded queue, so a slow
//!   camera consumer never stalls IMU delivery
//! - **Latest-wins commands**: the newest motor command replaces an unsent one
//! - **Explicit failure**: idle timeouts and transport loss end streams with a
//!   cause; reconnecting is the caller's decision
//!
//! # Quick Start
//!
//! ## Robot side
//!
//! ```rust,no_run
//! use robolink::{ImuSample, LinkConfig, Robolink, StreamProducer, WatchActuator};
//!
//! #[tokio::main]
//! async fn main() -> robolink::Result<()> {
//!     let config = LinkConfig::load("robolink.yaml")?;
//!     let producer = StreamProducer::new(config.streams.clone());
//!     let server = Robolink::serve(config, producer.clone(), WatchActuator::new()).await?;
//!
//!     producer.publish(ImuSample::from([0.0, 0.0, 9.8]));
//!     server.join().await
//! }
//! ```
//!
//! ## Operator side
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use robolink::{LinkConfig, Robolink};
//!
//! #[tokio::main]
//! async fn main() -> robolink::Result<()> {
//!     let link = Robolink::connect(LinkConfig::default()).await?;
//!     let mut frames = link.consumer().await?.stream_image().await?;
//!
//!     while let Some(frame) = frames.next().await {
//!         let frame = frame?;
//!         println!("{}x{}", frame.width(), frame.height());
//!     }
//!     println!("stream ended: {:?}", frames.cause());
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod wire;

// Stream plumbing
pub mod driver;
pub mod source;
pub mod stream;

// Roles
pub mod client;
pub mod server;

// Core exports
pub use config::{LinkConfig, QueueConfig, StreamsConfig};
pub use error::*;
pub use types::*;

// Main API exports
pub use client::{
    CancelHandle, Channel, CommandPublisher, ConnectionManager, ConnectionState, StreamConsumer,
    Subscription,
};
pub use driver::{Driver, DriverHandle};
pub use server::{ServerHandle, StreamProducer, TelemetryServer};
pub use source::{ActuatorSink, SensorSource, WatchActuator};
pub use wire::Ack;

/// Unified entry point for both ends of the link.
///
/// # Examples
///
/// ```rust,no_run
/// use robolink::{LinkConfig, Robolink};
///
/// # #[tokio::main]
/// # async fn main() -> robolink::Result<()> {
/// let link = Robolink::connect(LinkConfig::default().with_address("172.27.39.1:50051")).await?;
/// println!("{:?}", link.state());
/// # Ok(())
/// # }
/// ```
pub struct Robolink;

impl Robolink {
    /// Connect to a robot.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Config`] for an invalid configuration and
    /// [`LinkError::Connection`] when the robot cannot be reached within
    /// `connect_timeout_ms`. The attempt is not retried.
    pub async fn connect(config: LinkConfig) -> Result<ConnectionManager> {
        ConnectionManager::connect(config).await
    }

    /// Serve telemetry from `producer` and apply commands to `actuator`.
    ///
    /// The server runs on a background task until the returned handle is shut
    /// down.
    pub async fn serve<A>(
        config: LinkConfig,
        producer: StreamProducer,
        actuator: A,
    ) -> Result<ServerHandle>
    where
        A: ActuatorSink,
    {
        TelemetryServer::bind(config, producer, actuator).await?.spawn()
    }
}
