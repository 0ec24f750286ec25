//! Per-connection processing.
//!
//! A connection owns one accepted transport. Processing runs the upgrade
//! handshake and then three concurrent parts until the connection closes:
//!
//! - the ingestion loop, which decodes client frames and feeds data payloads
//!   to the inbound queue
//! - the handler bound to the negotiated subprotocol
//! - the emission loop, which sends every payload the handler queues as a
//!   `BINARY` frame
//!
//! All three stop once the shared completion flag is set by
//! [`ConnectionHandle::close`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument, trace};
use wavegate_proto::frame::{FrameHeader, Opcode};
use wavegate_proto::parser::{Decoded, Frame, FrameParser};
use wavegate_proto::{handshake, WsError, WsResult};

use crate::config::ServerConfig;
use crate::handler::HandlerRegistry;
use crate::queue::{payload_queue, Next, PayloadReceiver, PayloadSender, QueueCloser};
use crate::registry::{ConnectionId, ConnectionRegistry, Registration};

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// The write side of a transport.
struct Output {
    writer: BoxedWriter,
    /// A frame write was abandoned part way; the stream is no longer framed.
    torn: bool,
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Waiting for the upgrade request.
    Handshaking,
    /// Exchanging frames.
    Active,
    /// Close has been initiated.
    Closing,
    /// Processing finished and the connection left the registry.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub(crate) async fn wait_set(flag: &mut watch::Receiver<bool>) {
    // A dropped sender counts as set.
    let _ = flag.wait_for(|set| *set).await;
}

/// Shared control surface of a live connection.
///
/// The server keeps one handle per registered connection to shut down its
/// input and close it during [`Server::stop`](crate::Server::stop).
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    output: Mutex<Output>,
    close_timeout: Duration,
    closing: AtomicBool,
    done: watch::Sender<bool>,
    input_shutdown: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    subprotocol: OnceLock<String>,
    inbound: QueueCloser,
    outbound: QueueCloser,
}

impl ConnectionHandle {
    fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        writer: BoxedWriter,
        close_timeout: Duration,
        inbound: QueueCloser,
        outbound: QueueCloser,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            output: Mutex::new(Output { writer, torn: false }),
            close_timeout,
            closing: AtomicBool::new(false),
            done: watch::Sender::new(false),
            input_shutdown: watch::Sender::new(false),
            state: watch::Sender::new(ConnectionState::Handshaking),
            subprotocol: OnceLock::new(),
            inbound,
            outbound,
        })
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Arc<Self> {
        let (_, _, inbound) = payload_queue(1);
        let (_, _, outbound) = payload_queue(1);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(tokio::io::sink());
        Self::new(
            ConnectionId::new(),
            None,
            BufWriter::new(writer),
            crate::config::DEFAULT_CLOSE_TIMEOUT,
            inbound,
            outbound,
        )
    }

    /// The connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The remote address, if the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The negotiated subprotocol, once the handshake has succeeded.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.get().map(String::as_str)
    }

    /// Check if close has been initiated.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Check if the completion flag is set.
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Stop reading from the transport.
    ///
    /// A pending handshake read or frame read completes as if the peer had
    /// ended the stream.
    pub fn shutdown_input(&self) {
        self.input_shutdown.send_replace(true);
    }

    /// Close the connection.
    ///
    /// Sets the completion flag and closes both payload queues, which
    /// abandons any frame write still waiting on the peer. With
    /// `send_close`, a zero-length `CLOSE` frame is then written unless a
    /// frame was abandoned part way; failures and a write outlasting the
    /// configured close timeout are ignored. Finally the transport's write
    /// direction is shut down.
    ///
    /// Only the first call performs the procedure. Later calls wait until
    /// the completion flag is set.
    pub async fn close(&self, send_close: bool) {
        if self.closing.swap(true, Ordering::AcqRel) {
            wait_set(&mut self.done.subscribe()).await;
            return;
        }
        self.set_state(ConnectionState::Closing);
        debug!(connection_id = %self.id, send_close, "closing connection");

        self.done.send_replace(true);
        self.inbound.close();
        self.outbound.close();

        let mut output = self.output.lock().await;
        if send_close && output.torn {
            debug!(connection_id = %self.id, "frame write abandoned; not sending close frame");
        } else if send_close {
            let header = FrameHeader::encode(Opcode::Close, 0);
            let sent = async {
                output.writer.write_all(header.as_bytes()).await?;
                output.writer.flush().await
            };
            match tokio::time::timeout(self.close_timeout, sent).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(connection_id = %self.id, error = %e, "failed to send close frame");
                }
                Err(_) => debug!(connection_id = %self.id, "timed out sending close frame"),
            }
        }

        // Bypasses the buffer: whatever is left there was never framed completely.
        if let Err(e) = output.writer.get_mut().shutdown().await {
            trace!(connection_id = %self.id, error = %e, "write shutdown failed");
        }
    }

    /// Write one unfragmented frame and flush it.
    ///
    /// The header and payload go out as one vectored write. Returns
    /// `Ok(false)` without writing once close has been initiated, so no
    /// data follows the `CLOSE` frame, and also when the completion flag is
    /// set while the write is still waiting on the peer.
    pub(crate) async fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> std::io::Result<bool> {
        let mut done = self.done.subscribe();
        let mut output = self.output.lock().await;
        if self.is_closing() {
            return Ok(false);
        }

        let header = FrameHeader::encode(opcode, payload.len());
        let mut frame = Buf::chain(header.as_bytes(), payload);
        let written = tokio::select! {
            biased;
            () = wait_set(&mut done) => None,
            written = async {
                output.writer.write_all_buf(&mut frame).await?;
                output.writer.flush().await
            } => Some(written),
        };

        match written {
            Some(result) => result.map(|()| true),
            None => {
                output.torn = true;
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("subprotocol", &self.subprotocol())
            .finish_non_exhaustive()
    }
}

/// Everything a connection needs from its server.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) registry: Arc<ConnectionRegistry>,
}

/// Marks the connection closed, then leaves the registry.
struct Lifetime {
    handle: Arc<ConnectionHandle>,
    _registration: Registration,
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        self.handle.set_state(ConnectionState::Closed);
    }
}

/// An accepted connection, registered until processing finishes.
pub(crate) struct Connection {
    handle: Arc<ConnectionHandle>,
    reader: BoxedReader,
    config: Arc<ServerConfig>,
    handlers: Arc<HandlerRegistry>,
    inbound_tx: PayloadSender,
    inbound_rx: PayloadReceiver,
    outbound_tx: PayloadSender,
    outbound_rx: PayloadReceiver,
    lifetime: Lifetime,
}

impl Connection {
    /// Wrap a transport and register it.
    pub(crate) fn new<S>(stream: S, peer: Option<SocketAddr>, ctx: &ConnectionContext) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

        let (inbound_tx, inbound_rx, inbound_closer) =
            payload_queue(ctx.config.inbound_queue_capacity());
        let (outbound_tx, outbound_rx, outbound_closer) =
            payload_queue(ctx.config.outbound_queue_capacity());

        let handle = ConnectionHandle::new(
            ConnectionId::new(),
            peer,
            BufWriter::with_capacity(ctx.config.write_buffer_size(), write_half),
            ctx.config.close_timeout(),
            inbound_closer,
            outbound_closer,
        );
        let registration = ctx.registry.register(Arc::clone(&handle));

        Self {
            reader: BufReader::with_capacity(ctx.config.read_buffer_size(), read_half),
            config: Arc::clone(&ctx.config),
            handlers: Arc::clone(&ctx.handlers),
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            lifetime: Lifetime {
                handle: Arc::clone(&handle),
                _registration: registration,
            },
            handle,
        }
    }

    /// The connection's control handle.
    pub(crate) fn handle(&self) -> Arc<ConnectionHandle> {
        Arc::clone(&self.handle)
    }

    /// Run the connection to completion.
    ///
    /// Succeeds if the peer went away before the handshake, or if the
    /// ingestion loop, the handler and the emission loop all succeed. The
    /// connection is closed and deregistered before this returns.
    #[instrument(
        name = "connection",
        skip_all,
        fields(connection_id = %self.handle.id, peer = ?self.handle.peer)
    )]
    pub(crate) async fn process(self) -> WsResult<()> {
        let Self {
            handle,
            mut reader,
            config,
            handlers,
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            lifetime,
        } = self;

        let result = run(
            &handle,
            &mut reader,
            &config,
            &handlers,
            (inbound_tx, inbound_rx),
            (outbound_tx, outbound_rx),
        )
        .await;

        handle.close(false).await;
        drop(lifetime);
        result
    }
}

async fn run(
    handle: &ConnectionHandle,
    reader: &mut BoxedReader,
    config: &ServerConfig,
    handlers: &HandlerRegistry,
    (inbound_tx, inbound_rx): (PayloadSender, PayloadReceiver),
    (outbound_tx, outbound_rx): (PayloadSender, PayloadReceiver),
) -> WsResult<()> {
    let negotiated = {
        let mut input_shutdown = handle.input_shutdown.subscribe();
        let mut done = handle.done.subscribe();
        let mut output = handle.output.lock().await;
        tokio::select! {
            biased;
            () = wait_set(&mut input_shutdown) => None,
            () = wait_set(&mut done) => None,
            accepted = handshake::accept(
                reader,
                &mut output.writer,
                config.max_handshake_size(),
                |subprotocol| handlers.contains(subprotocol),
            ) => accepted?,
        }
    };
    let Some(negotiated) = negotiated else {
        debug!("no upgrade request received");
        return Ok(());
    };

    let handler = handlers
        .get(&negotiated.subprotocol)
        .ok_or_else(|| WsError::unsupported_subprotocol(negotiated.subprotocol.as_str()))?;
    debug!(subprotocol = %negotiated.subprotocol, "handshake complete");
    let _ = handle.subprotocol.set(negotiated.subprotocol);
    handle.set_state(ConnectionState::Active);

    let handling = async {
        match handler.call(inbound_rx, outbound_tx).await {
            Ok(()) => Ok(()),
            Err(e) => {
                handle.shutdown_input();
                handle.close(true).await;
                Err(WsError::Handler(e))
            }
        }
    };

    let (ingested, handled, emitted) = tokio::join!(
        ingest(handle, reader, config.frame_parser(), inbound_tx),
        handling,
        emit(handle, outbound_rx),
    );
    handled.and(ingested).and(emitted)
}

async fn ingest(
    handle: &ConnectionHandle,
    reader: &mut BoxedReader,
    parser: FrameParser,
    inbound: PayloadSender,
) -> WsResult<()> {
    let mut done = handle.done.subscribe();
    let mut input_shutdown = handle.input_shutdown.subscribe();

    loop {
        let decoded = tokio::select! {
            biased;
            () = wait_set(&mut done) => break,
            () = wait_set(&mut input_shutdown) => Ok(Decoded::Eof),
            decoded = parser.read_frame(reader) => decoded,
        };

        match decoded {
            Ok(Decoded::Frame(frame)) => match frame.opcode() {
                Some(Opcode::Continuation | Opcode::Text | Opcode::Binary) => {
                    if inbound.send(frame.into_payload()).await.is_err() {
                        break;
                    }
                }
                Some(Opcode::Close) => {
                    debug!("close frame received");
                    handle.close(true).await;
                    break;
                }
                Some(Opcode::Ping) => handle_ping(handle, &frame),
                Some(Opcode::Pong) => handle_pong(handle, &frame),
                None => trace!(opcode = frame.raw_opcode(), "ignoring frame"),
            },
            Ok(Decoded::Eof) => {
                debug!("peer closed the stream");
                handle.close(false).await;
                break;
            }
            Ok(Decoded::Invalid(e)) => {
                debug!(error = %WsError::FrameDecode(e), "invalid frame");
                handle.close(true).await;
                break;
            }
            Err(e) => {
                debug!(error = %e, "read failed");
                handle.close(true).await;
                break;
            }
        }
    }
    Ok(())
}

/// Called for every `PING` frame. Pings are not answered yet.
fn handle_ping(handle: &ConnectionHandle, frame: &Frame) {
    trace!(connection_id = %handle.id, len = frame.payload().len(), "ping received");
}

/// Called for every `PONG` frame.
fn handle_pong(handle: &ConnectionHandle, frame: &Frame) {
    trace!(connection_id = %handle.id, len = frame.payload().len(), "pong received");
}

async fn emit(handle: &ConnectionHandle, mut outbound: PayloadReceiver) -> WsResult<()> {
    let mut done = handle.done.subscribe();

    loop {
        let next = tokio::select! {
            biased;
            () = wait_set(&mut done) => return Ok(()),
            next = outbound.next() => next,
        };

        match next {
            Next::Payload(payload) => {
                if let Err(e) = handle.send_frame(Opcode::Binary, &payload).await {
                    debug!(error = %e, "write failed");
                    handle.close(false).await;
                    return Err(WsError::Io(e));
                }
            }
            Next::Drained => {
                debug!("handler finished");
                handle.close(true).await;
                return Ok(());
            }
            Next::Closed => return Ok(()),
        }
    }
}
