//! Error types for the robolink bridge.
//!
//! All fallible operations return [`LinkError`]. Variants carry enough context to
//! tell which stream or connection failed and how the caller should react.
//!
//! ## Error Categories
//!
//! - **Connection**: the transport could not be established or died. Fatal to every
//!   stream on that connection, never retried implicitly.
//! - **Decode**: one malformed payload. Consumers log and skip it.
//! - **Schema mismatch**: persistent arity disagreement. Ends that stream only.
//! - **Stream terminated**: idle timeout or abnormal end, carrying a [`TerminationCause`].
//!
//! ```rust
//! use robolink::LinkError;
//!
//! let error = LinkError::connection_failed("10.0.0.2:50051", "connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::StreamKind;

/// Result type alias for robolink operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for robolink operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Failed to connect to {address}: {reason}")]
    Connection {
        address: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to decode {kind} payload: {details}")]
    Decode { kind: StreamKind, details: String },

    #[error("Schema mismatch on {kind} stream: expected {expected} values, found {found}")]
    SchemaMismatch { kind: StreamKind, expected: usize, found: usize },

    #[error("Stream terminated: {cause}")]
    StreamTerminated { cause: TerminationCause },

    #[error("Protocol violation: {details}")]
    Protocol { details: String },

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid motor command: {details}")]
    InvalidCommand { details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Config file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{context} is closed")]
    Closed { context: String },
}

/// Why a stream stopped producing values.
///
/// Every finished subscription records one of these, so callers can tell a
/// cancelled stream from one the server ended or the transport killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// The caller cancelled the stream
    Cancelled,
    /// The server finished the stream without error
    ServerEnded,
    /// The connection closed cleanly underneath the stream
    ConnectionClosed,
    /// No data arrived within the configured idle timeout
    IdleTimeout(Duration),
    /// The transport failed
    Transport(String),
    /// The server reported an error for this call
    Remote(String),
    /// Payloads disagreed with the configured schema
    SchemaMismatch,
    /// A payload of the wrong shape arrived for this call
    Protocol(String),
}

impl TerminationCause {
    /// Whether this cause is surfaced as [`LinkError::StreamTerminated`]
    /// rather than a plain end of sequence.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TerminationCause::IdleTimeout(_)
                | TerminationCause::Transport(_)
                | TerminationCause::Remote(_)
        )
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Cancelled => f.write_str("cancelled by caller"),
            TerminationCause::ServerEnded => f.write_str("server ended the stream"),
            TerminationCause::ConnectionClosed => f.write_str("connection closed"),
            TerminationCause::IdleTimeout(idle) => write!(f, "no data for {:?}", idle),
            TerminationCause::Transport(reason) => write!(f, "transport failure: {}", reason),
            TerminationCause::Remote(reason) => write!(f, "server error: {}", reason),
            TerminationCause::SchemaMismatch => f.write_str("schema mismatch"),
            TerminationCause::Protocol(reason) => write!(f, "protocol violation: {}", reason),
        }
    }
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Retrying a connection-level failure means reconnecting and re-subscribing.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Io(_) => true,
            LinkError::StreamTerminated { cause } => !matches!(
                cause,
                TerminationCause::Cancelled
                    | TerminationCause::SchemaMismatch
                    | TerminationCause::Protocol(_)
            ),
            LinkError::Closed { .. } => true,
            LinkError::Decode { .. } => false,
            LinkError::SchemaMismatch { .. } => false,
            LinkError::Protocol { .. } => false,
            LinkError::MessageTooLarge { .. } => false,
            LinkError::InvalidCommand { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::File { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } => vec![
                "Check the robot is powered and the server is running",
                "Verify the configured host and port",
                "Reconnect and re-subscribe every stream",
            ],
            LinkError::Decode { .. } => vec![
                "Check the camera encoder produces baseline JPEG",
                "Inspect the frame source for truncated buffers",
            ],
            LinkError::SchemaMismatch { .. } => vec![
                "Align imu_axes / motor_channels on both ends",
                "Check both ends run the same contract version",
            ],
            LinkError::StreamTerminated { .. } => vec![
                "Check the robot's sensor pipeline is still producing",
                "Increase idle_timeout_ms for slow sensors",
                "Reconnect and re-subscribe the stream",
            ],
            LinkError::Protocol { .. } => vec![
                "Check both ends run the same contract version",
                "Check max_message_bytes is large enough for frames",
            ],
            LinkError::MessageTooLarge { .. } => vec![
                "Raise max_message_bytes on both ends",
                "Lower the camera resolution or JPEG quality",
            ],
            LinkError::InvalidCommand { .. } => vec![
                "Send finite per-channel values",
                "Match the configured motor channel count",
            ],
            LinkError::Config { .. } => vec![
                "Fix the reported configuration field",
                "Remove the field to fall back to its default",
            ],
            LinkError::File { .. } => {
                vec!["Check the config file exists and is readable", "Check file permissions"]
            }
            LinkError::Io(_) => vec!["Check network connectivity", "Retry the operation"],
            LinkError::Timeout { .. } => {
                vec!["Increase the timeout", "Check network latency to the robot"]
            }
            LinkError::Closed { .. } => {
                vec!["Open a new stream or publisher", "Reconnect if the connection dropped"]
            }
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        LinkError::Connection { address: address.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        address: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { address: address.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for decode errors.
    pub fn decode(kind: StreamKind, details: impl Into<String>) -> Self {
        LinkError::Decode { kind, details: details.into() }
    }

    /// Helper constructor for protocol violations.
    pub fn protocol(details: impl Into<String>) -> Self {
        LinkError::Protocol { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into() }
    }

    /// Helper constructor for closed channels and publishers.
    pub fn closed(context: impl Into<String>) -> Self {
        LinkError::Closed { context: context.into() }
    }

    /// Helper constructor for stream termination.
    pub fn terminated(cause: TerminationCause) -> Self {
        LinkError::StreamTerminated { cause }
    }
}
