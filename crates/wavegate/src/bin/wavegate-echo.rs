//! Echo server demo.
//!
//! Serves an echo handler for peers that request no subprotocol and for the
//! `echo` subprotocol, and stops gracefully on SIGINT or SIGTERM.
//!
//! ```text
//! wavegate-echo [ADDR]        # default 127.0.0.1:8080
//! RUST_LOG=debug wavegate-echo 0.0.0.0:9001
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use wavegate::prelude::*;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
    while let Some(payload) = input.recv().await {
        output.send(payload).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(&LogConfig::development().level_from_env())?;

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or(DEFAULT_ADDR)
        .parse()
        .context("invalid listen address")?;

    let server = Server::new(ServerConfig::default());
    server.register_handler("", echo);
    server.register_handler("echo", echo);

    let local = server.listen(addr).await?;
    tracing::info!(addr = %local, "echo server ready");

    wait_for_os_signal().await?;

    server.stop().await;
    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn wait_for_os_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to wait for Ctrl+C")?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}
