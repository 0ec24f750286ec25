//! RFC 6455 wire protocol for wavegate.
//!
//! This crate holds the parts of the WebSocket protocol that do not depend
//! on how connections are scheduled:
//!
//! - [`frame`] - opcodes and the outbound frame header codec
//! - [`parser`] - the incoming (client) frame parser
//! - [`handshake`] - the HTTP upgrade request reader and accept-key derivation
//! - [`error`] - the error taxonomy shared with `wavegate-server`
//!
//! # Example
//!
//! ```
//! use wavegate_proto::frame::{FrameHeader, Opcode};
//! use wavegate_proto::handshake::compute_accept_key;
//!
//! let header = FrameHeader::encode(Opcode::Binary, 300);
//! assert_eq!(header.as_bytes(), &[0x82, 126, 0x01, 0x2c]);
//!
//! let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==")?;
//! assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
//! # Ok::<(), wavegate_proto::WsError>(())
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod parser;

pub use error::{FrameError, HandlerError, WsError, WsResult};
pub use frame::{FrameHeader, Opcode};
pub use handshake::{compute_accept_key, Negotiated, UpgradeRequest, WEBSOCKET_GUID};
pub use parser::{Decoded, Frame, FrameParser};
