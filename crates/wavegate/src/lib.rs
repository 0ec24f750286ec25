//! # wavegate
//!
//! An RFC 6455 WebSocket server engine.
//!
//! A [`Server`] accepts TCP connections, performs the upgrade handshake and
//! runs the handler registered for the subprotocol the peer asked for. A
//! handler receives every data payload through an [`Inbound`] queue and
//! sends payloads back through an [`Outbound`] queue; each outgoing payload
//! becomes one `BINARY` frame.
//!
//! ## Crates
//!
//! - [`proto`] - frame header codec, frame parser and handshake
//! - [`server`] - listeners, connections and graceful shutdown
//! - [`telemetry`] - logging setup for binaries
//!
//! ## Example
//!
//! ```rust,no_run
//! use wavegate::prelude::*;
//!
//! async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
//!     while let Some(payload) = input.recv().await {
//!         output.send(payload).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::development())?;
//!
//!     let server = Server::new(ServerConfig::default());
//!     server.register_handler("", echo);
//!     server.listen("127.0.0.1:8080".parse()?).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub use wavegate_proto as proto;
pub use wavegate_server as server;
pub use wavegate_telemetry as telemetry;

pub use wavegate_proto::{HandlerError, WsError, WsResult};
pub use wavegate_server::{
    ConnectionState, Handler, Inbound, ListenOptions, Outbound, Server, ServerConfig,
};
pub use wavegate_telemetry::{init_logging, LogConfig, LogFormat};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        init_logging, HandlerError, Inbound, ListenOptions, LogConfig, Outbound, Server,
        ServerConfig, WsError, WsResult,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
        while let Some(payload) = input.recv().await {
            output.send(payload).await?;
        }
        Ok(())
    }

    #[test]
    fn test_prelude_registers_handlers() {
        let server = Server::default();
        server.register_handler("", echo);
        assert!(server.is_handler_registered(""));
    }

    #[test]
    fn test_accept_key_reexported() {
        let key = crate::proto::compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        assert_eq!(key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_listen_and_stop() {
        tokio_test::block_on(async {
            let server = Server::default();
            server.register_handler("echo", echo);
            let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
            assert_eq!(server.local_addrs(), vec![addr]);
            server.stop().await;
            assert!(server.is_stopped());
        });
    }
}
