//! End-to-end scenarios against a real `Server` bound to `127.0.0.1:0`,
//! covering the literal request/response pairs from this crate's
//! scenario suite: plain HTTP, the WebSocket handshake, ping/pong, a
//! masked-frame echo, per-IP admission caps, and the close handshake.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wsgate::{
    Builder, Frame, Handlers, HttpRequest, OpCode, ParseOutcome, Payload, SecurityConfig,
    WebSocketMessage,
};

struct Echo;

#[async_trait::async_trait]
impl Handlers for Echo {
    async fn on_http_request(&self, _request: HttpRequest) -> Vec<u8> {
        b"<h1>hi</h1>".to_vec()
    }

    async fn on_websocket_message(&self, message: WebSocketMessage) -> Option<String> {
        String::from_utf8(message.payload).ok()
    }
}

async fn spawn_server(handlers: Arc<dyn Handlers>, config: SecurityConfig) -> (Arc<wsgate::Server>, std::net::SocketAddr) {
    let server = Arc::new(
        Builder::new()
            .bind_address("127.0.0.1")
            .port(0)
            .handlers(handlers)
            .security_config(config)
            .build()
            .await
            .unwrap(),
    );
    let addr = server.local_addr().unwrap();
    let runner = server.clone();
    tokio::spawn(async move {
        runner.run(Duration::from_secs(1)).await;
    });
    (server, addr)
}

/// Reads frames off `stream` until `parse` yields a `Complete` outcome,
/// accumulating bytes from the wire as needed.
async fn read_one_frame(stream: &mut TcpStream) -> wsgate::Frame<'static> {
    let mut buf = Vec::new();
    loop {
        match wsgate::parse_frame(&buf) {
            ParseOutcome::Complete { frame, .. } => return frame,
            ParseOutcome::Incomplete => {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer closed before a full frame arrived");
                buf.extend_from_slice(&chunk[..n]);
            }
            ParseOutcome::Invalid(reason) => panic!("invalid frame on wire: {reason}"),
            ParseOutcome::Oversize { .. } => unreachable!("parse_frame has no size cap"),
        }
    }
}

async fn read_header_block(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before sending a header block");
        buf.extend_from_slice(&chunk[..n]);
        if String::from_utf8_lossy(&buf).contains("\r\n\r\n") {
            return String::from_utf8_lossy(&buf).into_owned();
        }
    }
}

#[tokio::test]
async fn http_get_root_returns_wrapped_body() {
    let (_server, addr) = spawn_server(Arc::new(Echo), SecurityConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 11\r\n"));
    assert!(text.ends_with("<h1>hi</h1>"));
}

#[tokio::test]
async fn handshake_succeeds_with_rfc_example_key() {
    let (_server, addr) = spawn_server(Arc::new(Echo), SecurityConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: x\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let header_block = read_header_block(&mut stream).await;
    assert!(header_block.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(header_block.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
}

async fn open_ws(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: x\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();
    let _ = read_header_block(&mut stream).await;
    stream
}

#[tokio::test]
async fn ping_is_answered_with_an_empty_pong() {
    let (_server, addr) = spawn_server(Arc::new(Echo), SecurityConfig::default()).await;
    let mut stream = open_ws(addr).await;

    let ping = Frame::ping(Payload::Owned(Vec::new()));
    stream.write_all(&ping.generate()).await.unwrap();

    let frame = read_one_frame(&mut stream).await;
    assert_eq!(frame.opcode, OpCode::Pong);
    assert!(frame.payload.is_empty());
}

#[tokio::test]
async fn masked_text_frame_is_echoed_back_unmasked() {
    let (_server, addr) = spawn_server(Arc::new(Echo), SecurityConfig::default()).await;
    let mut stream = open_ws(addr).await;

    let mut outgoing = Frame::text(Payload::Owned(b"hello".to_vec()));
    outgoing.mask();
    stream.write_all(&outgoing.generate()).await.unwrap();

    let frame = read_one_frame(&mut stream).await;
    assert_eq!(frame.opcode, OpCode::Text);
    assert!(frame.mask.is_none());
    assert_eq!(frame.payload.as_slice(), b"hello");
}

#[tokio::test]
async fn close_frame_is_mirrored_back() {
    let (_server, addr) = spawn_server(Arc::new(Echo), SecurityConfig::default()).await;
    let mut stream = open_ws(addr).await;

    let close = Frame::close(1000, b"");
    stream.write_all(&close.generate()).await.unwrap();

    let frame = read_one_frame(&mut stream).await;
    assert_eq!(frame.opcode, OpCode::Close);
    assert_eq!(&frame.payload.as_slice()[0..2], &1000u16.to_be_bytes());

    let mut trailing = [0u8; 16];
    let n = stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "server must close the tcp connection after mirroring the close frame");
}

#[tokio::test]
async fn loopback_connections_ignore_tight_caps() {
    // Real sockets dialed at a 127.0.0.1-bound listener always report a
    // loopback peer address, which spec.md §4.F exempts unconditionally from
    // every admission cap — so this is the one admission property an
    // end-to-end test (as opposed to `admission.rs`'s unit tests, which use
    // synthetic non-loopback IPs) can actually exercise over real TCP.
    struct Counting {
        violations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Handlers for Counting {
        async fn on_security_violation(&self, _client_ip: IpAddr, _reason: &str) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handlers = Arc::new(Counting {
        violations: AtomicUsize::new(0),
    });
    let config = SecurityConfig {
        max_connections_per_ip: 1,
        max_connections_total: 1,
        enable_connection_timeout: false,
        ..Default::default()
    };
    let (server, addr) = spawn_server(handlers.clone(), config).await;

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(TcpStream::connect(addr).await.unwrap());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connection_count(), 5);
    assert_eq!(handlers.violations.load(Ordering::SeqCst), 0);
}
