//! Server configuration types.
//!
//! This module provides configuration types for the WebSocket server,
//! using the builder pattern for ergonomic construction.
//!
//! # Example
//!
//! ```rust
//! use wavegate_server::ServerConfig;
//!
//! let config = ServerConfig::builder()
//!     .inbound_queue_capacity(64)
//!     .max_frame_size(1024 * 1024)
//!     .build();
//!
//! assert_eq!(config.inbound_queue_capacity(), 64);
//! ```

use std::time::Duration;

use wavegate_proto::handshake::DEFAULT_MAX_HANDSHAKE_SIZE;
use wavegate_proto::parser::{FrameParser, DEFAULT_MAX_FRAME_SIZE};

/// Default capacity of the per-connection payload queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Default size of the read and write buffers layered over a transport.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Default time allowed for writing a `CLOSE` frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Server configuration.
///
/// Applies to every connection accepted by the server.
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    inbound_queue_capacity: usize,
    outbound_queue_capacity: usize,
    read_buffer_size: usize,
    write_buffer_size: usize,
    max_frame_size: usize,
    max_handshake_size: usize,
    accept_unmasked_frames: bool,
    close_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the capacity of the queue feeding the handler.
    #[must_use]
    pub fn inbound_queue_capacity(&self) -> usize {
        self.inbound_queue_capacity
    }

    /// Returns the capacity of the queue drained onto the wire.
    #[must_use]
    pub fn outbound_queue_capacity(&self) -> usize {
        self.outbound_queue_capacity
    }

    /// Returns the read buffer size.
    #[must_use]
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Returns the write buffer size.
    #[must_use]
    pub fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }

    /// Returns the largest accepted frame payload.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Returns the largest accepted upgrade request head.
    #[must_use]
    pub fn max_handshake_size(&self) -> usize {
        self.max_handshake_size
    }

    /// Returns whether unmasked client frames are accepted.
    #[must_use]
    pub fn accept_unmasked_frames(&self) -> bool {
        self.accept_unmasked_frames
    }

    /// Returns how long a connection may spend writing its `CLOSE` frame.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Builds the frame parser described by this configuration.
    #[must_use]
    pub fn frame_parser(&self) -> FrameParser {
        FrameParser::new(self.max_frame_size).accept_unmasked(self.accept_unmasked_frames)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig {
                inbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
                outbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
                read_buffer_size: DEFAULT_BUFFER_SIZE,
                write_buffer_size: DEFAULT_BUFFER_SIZE,
                max_frame_size: DEFAULT_MAX_FRAME_SIZE,
                max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
                accept_unmasked_frames: false,
                close_timeout: DEFAULT_CLOSE_TIMEOUT,
            },
        }
    }

    /// Sets the inbound queue capacity (minimum 1).
    #[must_use]
    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the outbound queue capacity (minimum 1).
    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the read buffer size.
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Sets the write buffer size.
    #[must_use]
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Sets the largest accepted frame payload.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Sets the largest accepted upgrade request head.
    #[must_use]
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Sets whether unmasked client frames are accepted.
    #[must_use]
    pub fn accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.config.accept_unmasked_frames = accept;
        self
    }

    /// Sets how long a connection may spend writing its `CLOSE` frame.
    ///
    /// A peer that stops reading would otherwise hold the close forever.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// Options applied when binding a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    /// Set `SO_REUSEADDR` before binding (default: true).
    pub reuse_address: bool,
    /// Maximum length of the pending-connection queue (default: 1024).
    pub backlog: u32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl ListenOptions {
    /// Create the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether `SO_REUSEADDR` is applied.
    pub fn reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    /// Set the listen backlog.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }
}
