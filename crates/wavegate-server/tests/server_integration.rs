//! End-to-end server tests over real TCP sockets.
//!
//! Each test binds a [`Server`] on an ephemeral loopback port and talks to it
//! with a minimal raw client that writes the upgrade request and masked
//! frames by hand.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wavegate_proto::HandlerError;
use wavegate_server::{ConnectionState, Inbound, Outbound, Server, ServerConfig};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
const TIMEOUT: Duration = Duration::from_secs(2);

async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
    while let Some(payload) = input.recv().await {
        output.send(payload).await?;
    }
    Ok(())
}

/// Starts a server with an echo handler for "" and "echo".
async fn start_echo_server() -> (Server, SocketAddr) {
    let server = Server::new(ServerConfig::default());
    server.register_handler("", echo);
    server.register_handler("echo", echo);
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, addr)
}

/// Waits until the server has no live connection left.
async fn wait_for_empty(server: &Server) {
    tokio::time::timeout(TIMEOUT, async {
        while server.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connections should be released");
}

struct RawClient {
    stream: TcpStream,
}

impl RawClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send_request(&mut self, protocol: Option<&str>) {
        let mut req = format!(
            "GET /chat HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
            self.stream.peer_addr().unwrap()
        );
        if let Some(protocol) = protocol {
            req.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        req.push_str(&format!("Sec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"));
        self.stream.write_all(req.as_bytes()).await.unwrap();
    }

    async fn read_head(&mut self) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(self.stream.read_u8().await.unwrap());
        }
        String::from_utf8(head).unwrap()
    }

    async fn handshake(&mut self, protocol: Option<&str>) -> String {
        self.send_request(protocol).await;
        tokio::time::timeout(TIMEOUT, self.read_head())
            .await
            .expect("server should answer the handshake")
    }

    async fn send_frame(&mut self, opcode: u8, payload: &[u8]) {
        let mask = [0xa1, 0x5b, 0x0c, 0x77];
        let mut frame = vec![0x80 | opcode];
        match payload.len() {
            len @ 0..=125 => frame.push(0x80 | len as u8),
            len @ 126..=65535 => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                frame.push(0x80 | 127);
                frame.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        tokio::time::timeout(TIMEOUT, async {
            let b0 = self.stream.read_u8().await.unwrap();
            let b1 = self.stream.read_u8().await.unwrap();
            let len = match b1 & 0x7f {
                126 => u64::from(self.stream.read_u16().await.unwrap()),
                127 => self.stream.read_u64().await.unwrap(),
                n => u64::from(n),
            };
            let mut payload = vec![0; len as usize];
            self.stream.read_exact(&mut payload).await.unwrap();
            (b0, payload)
        })
        .await
        .expect("server should send a frame")
    }

    async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        tokio::time::timeout(TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("server should end the stream")
            .unwrap();
        rest
    }
}

#[tokio::test]
async fn test_handshake_accept_key() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;

    let head = client.handshake(None).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Connection: Upgrade\r\n"));
    assert!(head.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(head.contains(&format!("Sec-WebSocket-Accept: {ACCEPT}\r\n")));
    assert!(!head.contains("Sec-WebSocket-Protocol"));

    server.stop().await;
}

#[tokio::test]
async fn test_echo_with_subprotocol() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;

    let head = client.handshake(Some("echo")).await;
    assert!(head.contains("Sec-WebSocket-Protocol: echo\r\n"));

    client.send_frame(0x2, b"first").await;
    client.send_frame(0x1, b"second").await;
    assert_eq!(client.read_frame().await, (0x82, b"first".to_vec()));
    assert_eq!(client.read_frame().await, (0x82, b"second".to_vec()));

    let snapshot = server.connections().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state(), ConnectionState::Active);
    assert_eq!(snapshot[0].subprotocol(), Some("echo"));

    server.stop().await;
}

#[tokio::test]
async fn test_large_payload_uses_extended_length() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;
    client.handshake(None).await;

    let medium = vec![7u8; 300];
    client.send_frame(0x2, &medium).await;
    assert_eq!(client.read_frame().await, (0x82, medium));

    let large = vec![9u8; 70_000];
    client.send_frame(0x2, &large).await;
    assert_eq!(client.read_frame().await, (0x82, large));

    server.stop().await;
}

#[tokio::test]
async fn test_close_handshake() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;
    client.handshake(None).await;

    client.send_frame(0x8, b"").await;
    assert_eq!(client.read_frame().await, (0x88, Vec::new()));
    assert!(client.read_to_end().await.is_empty());

    wait_for_empty(&server).await;
    server.stop().await;
}

#[tokio::test]
async fn test_missing_upgrade_rejected() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;

    let req = format!("GET / HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: {KEY}\r\n\r\n");
    client.stream.write_all(req.as_bytes()).await.unwrap();
    assert!(client.read_to_end().await.is_empty());

    wait_for_empty(&server).await;
    server.stop().await;
}

#[tokio::test]
async fn test_unsupported_subprotocol_never_stays_registered() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;

    client.send_request(Some("chat")).await;
    assert!(client.read_to_end().await.is_empty());

    wait_for_empty(&server).await;
    assert_eq!(server.connection_stats().total_closed, 1);
    server.stop().await;
}

#[tokio::test]
async fn test_peer_disconnect_releases_connection() {
    let (server, addr) = start_echo_server().await;
    let mut client = RawClient::connect(addr).await;
    client.handshake(None).await;
    drop(client);

    wait_for_empty(&server).await;
    server.stop().await;
}

#[tokio::test]
async fn test_stop_releases_idle_connections() {
    let (server, addr) = start_echo_server().await;

    let mut active = RawClient::connect(addr).await;
    active.handshake(None).await;
    let mut pending = RawClient::connect(addr).await;

    tokio::time::timeout(TIMEOUT, async {
        while server.connection_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both connections should be registered");

    tokio::time::timeout(TIMEOUT, server.stop())
        .await
        .expect("stop should finish");
    assert!(server.is_stopped());
    assert_eq!(server.connection_count(), 0);

    assert!(active.read_to_end().await.is_empty());
    assert!(pending.read_to_end().await.is_empty());

    tokio::time::timeout(TIMEOUT, server.stop())
        .await
        .expect("second stop should finish");
}

#[tokio::test]
async fn test_stop_with_peer_that_stopped_reading() {
    let server = Server::new(ServerConfig::default());
    server.register_handler("", |_input: Inbound, output: Outbound| async move {
        while output.send(vec![0u8; 1 << 20]).await.is_ok() {}
        Ok::<(), HandlerError>(())
    });
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut client = RawClient::connect(addr).await;
    client.handshake(None).await;
    // Never read again; the socket buffers fill up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(TIMEOUT, server.stop())
        .await
        .expect("stop should finish");
    assert_eq!(server.connection_count(), 0);
    drop(client);
}

#[tokio::test]
async fn test_no_accepts_after_stop() {
    let (server, addr) = start_echo_server().await;
    server.stop().await;

    let accepted = server.connection_stats().total_accepted;
    // The listener is gone; connecting either fails or is never processed.
    if let Ok(mut client) = TcpStream::connect(addr).await {
        let mut buf = [0u8; 1];
        let _ = tokio::time::timeout(Duration::from_millis(50), client.read(&mut buf)).await;
    }
    assert_eq!(server.connection_stats().total_accepted, accepted);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let (server, addr) = start_echo_server().await;

    let mut good = RawClient::connect(addr).await;
    good.handshake(None).await;

    let mut bad = RawClient::connect(addr).await;
    bad.handshake(None).await;
    // unmasked frame
    bad.stream.write_all(&[0x82, 0x01, b'x']).await.unwrap();
    assert_eq!(bad.read_frame().await, (0x88, Vec::new()));

    good.send_frame(0x2, b"still here").await;
    assert_eq!(good.read_frame().await, (0x82, b"still here".to_vec()));

    server.stop().await;
}
