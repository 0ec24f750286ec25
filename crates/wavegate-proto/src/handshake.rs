//! WebSocket HTTP upgrade handshake.
//!
//! The server side of RFC 6455 section 4.2: read one HTTP request off the
//! transport, check that it asks for a `websocket` upgrade and a supported
//! subprotocol, derive `Sec-WebSocket-Accept` and answer with `101
//! Switching Protocols`.

use std::io;

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default limit on the size of the upgrade request head (8 KiB).
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8192;

const MAX_HEADERS: usize = 64;

/// Length of a base64-encoded SHA-1 digest.
const ACCEPT_KEY_LEN: usize = 28;

const UPGRADE_REPLY_HEAD: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Version: 13\r\n\
Sec-WebSocket-Accept: ";

/// A parsed HTTP upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Get the request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get the request target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header by case-insensitive name.
    ///
    /// Missing headers read as the empty string.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Get all headers in the order received.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn parse(head: &[u8]) -> WsResult<Self> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => return Err(WsError::malformed("incomplete request")),
            Err(e) => return Err(WsError::malformed(e.to_string())),
        }

        let headers = req
            .headers
            .iter()
            .map(|h| {
                std::str::from_utf8(h.value)
                    .map(|v| (h.name.to_string(), v.to_string()))
                    .map_err(|_| WsError::malformed(format!("non UTF-8 value in {}", h.name)))
            })
            .collect::<WsResult<Vec<_>>>()?;

        Ok(Self {
            method: req.method.unwrap_or_default().to_string(),
            path: req.path.unwrap_or("/").to_string(),
            headers,
        })
    }
}

/// Read one HTTP request head from the transport.
///
/// Only the bytes up to and including the terminating blank line are
/// consumed, so frames pipelined behind the request stay in the reader.
/// Returns `Ok(None)` if the stream ends before any request byte arrives.
pub async fn read_upgrade_request<R>(reader: &mut R, max_size: usize) -> WsResult<Option<UpgradeRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);

    loop {
        let remaining = max_size.saturating_sub(head.len());
        if remaining == 0 {
            return Err(WsError::malformed("request head too large"));
        }

        let start = head.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut head)
            .await?;

        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(WsError::malformed("stream ended mid-request"));
        }

        let line = &head[start..];
        if !line.ends_with(b"\n") {
            continue;
        }
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // RFC 7230 3.5: ignore empty lines ahead of the request-line
                head.clear();
                continue;
            }
            return UpgradeRequest::parse(&head).map(Some);
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// This is `base64(sha1(key + GUID))`.
pub fn compute_accept_key(key: &str) -> WsResult<String> {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();

    let mut encoded = [0u8; ACCEPT_KEY_LEN];
    let written = base64::engine::general_purpose::STANDARD
        .encode_slice(digest, &mut encoded)
        .map_err(|e| WsError::crypto(format!("base64: {e}")))?;
    let accept = std::str::from_utf8(&encoded[..written])
        .map_err(|e| WsError::crypto(format!("base64 output: {e}")))?;

    Ok(accept.to_string())
}

/// The outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// The subprotocol selected by the peer, empty if none.
    pub subprotocol: String,
    /// The derived `Sec-WebSocket-Accept` value.
    pub accept_key: String,
}

/// Validate an upgrade request and derive the accept key.
///
/// `is_supported` decides whether a subprotocol (possibly empty) has a
/// handler.
pub fn negotiate<F>(request: &UpgradeRequest, is_supported: F) -> WsResult<Negotiated>
where
    F: Fn(&str) -> bool,
{
    if request.header("Upgrade") != "websocket" {
        return Err(WsError::MissingUpgrade);
    }

    let subprotocol = request.header("Sec-WebSocket-Protocol");
    if !is_supported(subprotocol) {
        return Err(WsError::unsupported_subprotocol(subprotocol));
    }
    debug!(subprotocol, "Sec-WebSocket-Protocol");

    let key = request.header("Sec-WebSocket-Key");
    debug!(
        key,
        version = request.header("Sec-WebSocket-Version"),
        "Sec-WebSocket-Key"
    );
    let accept_key = compute_accept_key(key)?;

    Ok(Negotiated {
        subprotocol: subprotocol.to_string(),
        accept_key,
    })
}

/// Build the `101 Switching Protocols` response.
pub fn upgrade_response(negotiated: &Negotiated) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(UPGRADE_REPLY_HEAD);
    buf.put_slice(negotiated.accept_key.as_bytes());
    if !negotiated.subprotocol.is_empty() {
        buf.put_slice(b"\r\nSec-WebSocket-Protocol: ");
        buf.put_slice(negotiated.subprotocol.as_bytes());
    }
    buf.put_slice(b"\r\n\r\n");

    buf.freeze()
}

/// Write the upgrade response and flush it.
pub async fn write_upgrade_response<W>(writer: &mut W, negotiated: &Negotiated) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&upgrade_response(negotiated)).await?;
    writer.flush().await
}

/// Run the server side of the handshake.
///
/// Returns `Ok(None)` when the peer went away before sending a request.
#[instrument(skip_all)]
pub async fn accept<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    max_size: usize,
    is_supported: F,
) -> WsResult<Option<Negotiated>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(&str) -> bool,
{
    let Some(request) = read_upgrade_request(reader, max_size).await? else {
        debug!("peer closed before sending an upgrade request");
        return Ok(None);
    };

    let negotiated = negotiate(&request, is_supported)?;
    debug!(accept = %negotiated.accept_key, "derived accept key");

    write_upgrade_response(writer, &negotiated).await?;
    Ok(Some(negotiated))
}
