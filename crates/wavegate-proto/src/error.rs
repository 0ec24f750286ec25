//! Error types for WebSocket operations.
//!
//! This module defines the errors that can occur during the upgrade
//! handshake, frame decoding, handler execution, and connection teardown.

use thiserror::Error;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Boxed error returned by user handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during WebSocket operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// The upgrade request could not be parsed as HTTP.
    #[error("incorrect upgrade request: {0}")]
    MalformedRequest(String),

    /// The `Upgrade` header was absent or not exactly `websocket`.
    #[error("Upgrade header missing")]
    MissingUpgrade,

    /// No handler is registered for the requested subprotocol.
    #[error("subprotocol not supported: {subprotocol:?}")]
    UnsupportedSubprotocol {
        /// The subprotocol requested by the peer (may be empty).
        subprotocol: String,
    },

    /// Computing the `Sec-WebSocket-Accept` value failed.
    #[error("accept key derivation failed: {0}")]
    Crypto(String),

    /// An incoming frame could not be decoded.
    #[error("frame decode failed: {0}")]
    FrameDecode(#[from] FrameError),

    /// The registered handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// A payload queue was closed while an operation was pending on it.
    #[error("payload queue closed")]
    QueueClosed,

    /// Binding a listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Create a new malformed request error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest(reason.into())
    }

    /// Create a new unsupported subprotocol error.
    pub fn unsupported_subprotocol(subprotocol: impl Into<String>) -> Self {
        Self::UnsupportedSubprotocol {
            subprotocol: subprotocol.into(),
        }
    }

    /// Create a new crypto error.
    pub fn crypto(reason: impl Into<String>) -> Self {
        Self::Crypto(reason.into())
    }

    /// Wrap a handler failure.
    pub fn handler(err: impl Into<HandlerError>) -> Self {
        Self::Handler(err.into())
    }

    /// Check if this error was raised while negotiating the upgrade.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::MissingUpgrade
                | Self::UnsupportedSubprotocol { .. }
                | Self::Crypto(_)
        )
    }

    /// Check if this error indicates the connection should be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::QueueClosed)
    }
}

/// Reasons an incoming frame is rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame")]
    Truncated,

    /// The most significant bit of a 64-bit length was set.
    #[error("invalid 64-bit payload length")]
    InvalidLength,

    /// The payload exceeds the configured maximum frame size.
    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured limit.
        max: usize,
    },

    /// A client frame arrived without the mask bit.
    #[error("client frame is not masked")]
    Unmasked,

    /// A control frame was fragmented or carried more than 125 bytes.
    #[error("malformed control frame")]
    MalformedControl,
}
