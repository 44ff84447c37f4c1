//! Error types for the streaming client.

use std::io;

use thiserror::Error;

/// Errors decoding a datagram from the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram shorter than its fixed header.
    #[error("packet too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size for the packet type.
        expected: usize,
        /// Actual datagram size.
        actual: usize,
    },

    /// Unknown packet type tag.
    #[error("unknown packet type: {0}")]
    UnknownType(u32),

    /// Protocol version mismatch.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Field value outside its valid range.
    #[error("invalid field {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },
}

/// Errors while reassembling a video unit from fragments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A continuation arrived out of sequence; the partial frame is dropped.
    #[error("packet loss: expected counter {expected}, got {actual}")]
    PacketLoss {
        /// Counter that would have continued the frame.
        expected: u32,
        /// Counter that arrived.
        actual: u32,
    },

    /// Fragment data exceeds the declared frame size.
    #[error("frame overflow: {attempted} bytes into a {capacity} byte frame")]
    Overflow {
        /// Declared frame size.
        capacity: usize,
        /// Size the frame would have reached.
        attempted: usize,
    },

    /// Continuation with no frame in progress.
    #[error("no frame in progress")]
    NoActiveFrame,

    /// SPS/PPS prefix could not be delimited.
    #[error("invalid parameter sets in frame {0}")]
    InvalidParameterSets(u64),

    /// Declared frame size exceeds the reassembly limit.
    #[error("frame size {size} exceeds limit {max}")]
    TooLarge {
        /// Declared frame size.
        size: usize,
        /// Largest accepted frame.
        max: usize,
    },
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Configuration key (environment variable name).
        key: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Top-level client errors.
///
/// Only [`ClientError::SocketInit`] is ever returned from a start request;
/// the remaining kinds are absorbed by the connection state machine and
/// surface to the application as lifecycle events.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The UDP endpoint could not be created or configured.
    #[error("socket initialization failed: {0}")]
    SocketInit(#[source] io::Error),

    /// No handshake reply within the discovery timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// A connected session was lost.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// A datagram could not be decoded.
    #[error("malformed datagram: {0}")]
    MalformedDatagram(#[from] PacketError),

    /// A video fragment could not be reassembled.
    #[error("malformed video fragment: {0}")]
    MalformedFrame(#[from] FrameError),

    /// Start requested while the manager is already running.
    #[error("connection manager already running")]
    AlreadyRunning,

    /// The manager was stopped before the requested operation completed.
    #[error("connection manager stopped")]
    Stopped,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Check if the state machine recovers from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::HandshakeTimeout
                | ClientError::SessionLost(_)
                | ClientError::MalformedDatagram(_)
                | ClientError::MalformedFrame(_)
        )
    }

    /// Check if this error is dropped silently (logged, session continues).
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            ClientError::MalformedDatagram(_) | ClientError::MalformedFrame(_)
        )
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
