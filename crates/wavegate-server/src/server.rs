//! WebSocket server lifecycle.
//!
//! This module provides the [`Server`], which owns the handler registry,
//! the listeners and every live connection.
//!
//! # Architecture
//!
//! - each [`listen`](Server::listen) call binds a TCP listener and runs an
//!   accept loop for it in the background
//! - each accepted connection is registered and processed in its own task
//! - a [`TaskGate`] counts accept loops and connection tasks so that
//!   [`stop`](Server::stop) can wait for all of them
//!
//! # Example
//!
//! ```rust,no_run
//! use wavegate_server::{Inbound, Outbound, Server, ServerConfig};
//! use wavegate_proto::HandlerError;
//!
//! async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
//!     while let Some(payload) = input.recv().await {
//!         output.send(payload).await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default());
//!     server.register_handler("", echo);
//!
//!     let addr = server.listen("127.0.0.1:8080".parse()?).await?;
//!     println!("listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use wavegate_proto::{WsError, WsResult};

use crate::config::{ListenOptions, ServerConfig};
use crate::connection::{wait_set, Connection, ConnectionContext};
use crate::gate::{GateGuard, TaskGate};
use crate::handler::{Handler, HandlerRegistry};
use crate::registry::{ConnectionRegistry, ConnectionStats};

#[derive(Debug)]
struct ServerShared {
    config: Arc<ServerConfig>,
    handlers: RwLock<Arc<HandlerRegistry>>,
    connections: Arc<ConnectionRegistry>,
    gate: TaskGate,
    listeners: Mutex<Vec<SocketAddr>>,
    abort_accept: watch::Sender<bool>,
    stopped: AtomicBool,
}

/// The wavegate WebSocket server.
///
/// Cloning a server yields another handle to the same server.
#[derive(Debug, Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Server {
    /// Creates a server with the given configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config: Arc::new(config),
                handlers: RwLock::new(Arc::new(HandlerRegistry::new())),
                connections: ConnectionRegistry::new(),
                gate: TaskGate::new(),
                listeners: Mutex::new(Vec::new()),
                abort_accept: watch::Sender::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Registers the handler for a subprotocol.
    ///
    /// The empty string selects the handler for peers that request no
    /// subprotocol. Connections accepted earlier keep the handlers that
    /// were registered when they were accepted.
    pub fn register_handler<H: Handler>(&self, subprotocol: impl Into<String>, handler: H) {
        let subprotocol = subprotocol.into();
        debug!(subprotocol = %subprotocol, "registering handler");
        let mut handlers = self.shared.handlers.write();
        Arc::make_mut(&mut handlers).register(subprotocol, handler);
    }

    /// Returns `true` if a handler is registered for `subprotocol`.
    #[must_use]
    pub fn is_handler_registered(&self, subprotocol: &str) -> bool {
        self.shared.handlers.read().contains(subprotocol)
    }

    /// Binds a listener with the default [`ListenOptions`].
    ///
    /// See [`listen_with`](Self::listen_with).
    pub async fn listen(&self, addr: SocketAddr) -> WsResult<SocketAddr> {
        self.listen_with(addr, ListenOptions::default()).await
    }

    /// Binds a listener and starts accepting connections on it.
    ///
    /// Returns the bound local address once the listener is ready; the
    /// accept loop runs in the background until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Bind`] if the socket cannot be created, bound or
    /// put into the listening state.
    pub async fn listen_with(&self, addr: SocketAddr, options: ListenOptions) -> WsResult<SocketAddr> {
        let bind_error = |source: io::Error| WsError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(options.reuse_address).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(options.backlog).map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        self.shared.listeners.lock().push(local);
        info!(addr = %local, backlog = options.backlog, "listening");

        match self.shared.gate.enter() {
            Some(guard) => {
                tokio::spawn(accept_loop(Arc::clone(&self.shared), listener, guard));
            }
            None => debug!(addr = %local, "server stopped; not accepting"),
        }
        Ok(local)
    }

    /// Stops the server.
    ///
    /// Pending accepts are aborted, the input of every live connection is
    /// shut down, and the call waits for every accept loop and connection
    /// task to finish. Connections still registered afterwards are closed
    /// with a `CLOSE` frame. Safe to call more than once.
    pub async fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            info!(connections = self.shared.connections.len(), "stopping server");
        }
        self.shared.abort_accept.send_replace(true);

        for conn in self.shared.connections.snapshot() {
            conn.shutdown_input();
        }

        self.shared.gate.close().await;

        let remaining = self.shared.connections.snapshot();
        if !remaining.is_empty() {
            debug!(count = remaining.len(), "closing remaining connections");
        }
        join_all(remaining.iter().map(|conn| conn.close(true))).await;

        info!("server stopped");
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Returns the local addresses of all bound listeners.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.shared.listeners.lock().clone()
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Returns connection counters.
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionStats {
        self.shared.connections.stats()
    }

    /// Returns the registry of live connections.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.connections
    }
}

impl ServerShared {
    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            config: Arc::clone(&self.config),
            handlers: Arc::clone(&self.handlers.read()),
            registry: Arc::clone(&self.connections),
        }
    }

    fn is_aborting(&self) -> bool {
        *self.abort_accept.borrow()
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(guard) = self.gate.enter() else {
            debug!(%peer, "server stopped; dropping connection");
            return;
        };

        let conn = Connection::new(stream, Some(peer), &self.context());
        let id = conn.handle().id();
        debug!(connection_id = %id, %peer, "connection accepted");

        // Accepted after stop() swept the registry.
        if self.is_aborting() {
            conn.handle().shutdown_input();
        }

        tokio::spawn(async move {
            match conn.process().await {
                Ok(()) => debug!(connection_id = %id, %peer, "connection finished"),
                Err(e) if e.is_handshake() => {
                    debug!(connection_id = %id, %peer, error = %e, "handshake failed");
                }
                Err(e) if e.is_fatal() => {
                    warn!(connection_id = %id, %peer, error = %e, "processing failed");
                }
                Err(e) => debug!(connection_id = %id, %peer, error = %e, "processing interrupted"),
            }
            drop(guard);
        });
    }
}

async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener, _guard: GateGuard) {
    let mut abort = shared.abort_accept.subscribe();
    let local = listener.local_addr().ok();

    loop {
        let accepted = tokio::select! {
            biased;
            () = wait_set(&mut abort) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => shared.spawn_connection(stream, peer),
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                debug!(addr = ?local, "pending connection aborted");
            }
            Err(e) => {
                error!(addr = ?local, error = %e, "accept failed; closing listener");
                break;
            }
        }
    }
    debug!(addr = ?local, "accept loop finished");
}
