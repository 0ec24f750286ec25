//! # wavegate server
//!
//! RFC 6455 WebSocket server engine.
//!
//! This crate accepts TCP connections, performs the upgrade handshake and
//! bridges each connection to a handler chosen by the negotiated
//! subprotocol:
//!
//! - [`Server`] - listeners, handler registration and graceful shutdown
//! - [`Inbound`] / [`Outbound`] - the bounded payload queues a handler works on
//! - [`ConnectionRegistry`] - the live connections, reachable during shutdown
//! - [`TaskGate`] - outstanding-task tracking for shutdown
//!
//! Every outgoing payload is sent as a single unfragmented `BINARY` frame.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wavegate_server::{Inbound, Outbound, Server};
//! use wavegate_proto::HandlerError;
//!
//! async fn shout(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
//!     while let Some(payload) = input.recv().await {
//!         output.send(payload.to_ascii_uppercase()).await?;
//!     }
//!     Ok(())
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::default();
//! server.register_handler("shout", shout);
//! server.listen("0.0.0.0:9000".parse()?).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod gate;
pub mod handler;
pub mod queue;
pub mod registry;
pub mod server;

pub use config::{ListenOptions, ServerConfig, ServerConfigBuilder};
pub use connection::{ConnectionHandle, ConnectionState};
pub use gate::{GateGuard, TaskGate};
pub use handler::{Handler, HandlerFuture, HandlerRegistry};
pub use queue::{Inbound, Outbound, PayloadReceiver, PayloadSender};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionStats};
pub use server::Server;
