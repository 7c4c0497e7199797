//! Integration tests for the server: real sockets, full session lifecycle

use chat_relay::config::ServerConfig;
use chat_relay::protocol;
use chat_relay::registry::Registry;
use chat_relay::server::ServerListener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start_server() -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let listener = ServerListener::bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = listener.registry();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });
    TestServer {
        addr,
        registry,
        shutdown_tx,
        handle,
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    local_port: u16,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let local_port = stream.local_addr().unwrap().port();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            local_port,
        }
    }

    /// Connect and complete the handshake, consuming the prompt, greeting,
    /// and this client's own join notice.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        assert_eq!(client.read_line().await, protocol::NAME_PROMPT);
        client.send_line(name).await;
        assert_eq!(client.read_line().await, protocol::greeting(name));
        assert_eq!(client.read_line().await, protocol::join_notice(name));
        client
    }

    async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("connection closed early")
    }

    async fn expect_closed(&mut self) {
        let line = timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for the connection to close")
            .expect("read failed");
        assert!(line.is_none(), "expected close, got {:?}", line);
    }
}

#[tokio::test]
async fn test_welcome_prompt_on_connect() {
    let server = start_server().await;

    let mut client = TestClient::connect(server.addr).await;
    assert_eq!(client.read_line().await, protocol::NAME_PROMPT);

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_blank_name_gets_fallback() {
    let server = start_server().await;

    let mut client = TestClient::connect(server.addr).await;
    assert_eq!(client.read_line().await, protocol::NAME_PROMPT);
    client.send_line("   ").await;

    let expected = protocol::fallback_name(client.local_port);
    assert_eq!(client.read_line().await, protocol::greeting(&expected));
    assert_eq!(client.read_line().await, protocol::join_notice(&expected));

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_chat_relay_between_clients() {
    let server = start_server().await;

    let mut alice = TestClient::join(server.addr, "Alice").await;

    let mut bob = TestClient::join(server.addr, "Bob").await;
    assert_eq!(alice.read_line().await, protocol::join_notice("Bob"));

    alice.send_line("hello").await;
    assert_eq!(alice.read_line().await, "Alice: hello");
    assert_eq!(bob.read_line().await, "Alice: hello");

    bob.send_line("/quit").await;
    assert_eq!(alice.read_line().await, protocol::leave_notice("Bob"));
    assert_eq!(bob.read_line().await, protocol::leave_notice("Bob"));
    bob.expect_closed().await;

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_quit_is_case_insensitive_on_the_wire() {
    let server = start_server().await;

    let mut alice = TestClient::join(server.addr, "Alice").await;
    let mut bob = TestClient::join(server.addr, "Bob").await;
    assert_eq!(alice.read_line().await, protocol::join_notice("Bob"));

    bob.send_line("/QuIt").await;
    assert_eq!(bob.read_line().await, protocol::leave_notice("Bob"));
    bob.expect_closed().await;

    // Exactly one leave notice reaches the other client.
    assert_eq!(alice.read_line().await, protocol::leave_notice("Bob"));
    alice.send_line("still here").await;
    assert_eq!(alice.read_line().await, "Alice: still here");

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_blank_chat_line_is_ignored() {
    let server = start_server().await;

    let mut alice = TestClient::join(server.addr, "Alice").await;
    let mut bob = TestClient::join(server.addr, "Bob").await;
    assert_eq!(alice.read_line().await, protocol::join_notice("Bob"));

    alice.send_line("   ").await;
    alice.send_line("ping").await;

    // The blank line produced no broadcast, so the next message on both
    // streams is the real one.
    assert_eq!(bob.read_line().await, "Alice: ping");
    assert_eq!(alice.read_line().await, "Alice: ping");

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_immediate_disconnect_emits_fallback_leave() {
    let server = start_server().await;

    let mut alice = TestClient::join(server.addr, "Alice").await;

    // A client that connects and vanishes without ever sending a line.
    let ghost = TcpStream::connect(server.addr).await.unwrap();
    let ghost_port = ghost.local_addr().unwrap().port();
    drop(ghost);

    let expected = protocol::leave_notice(&protocol::fallback_name(ghost_port));
    assert_eq!(alice.read_line().await, expected);

    // No join notice was emitted and no stale session lingers: the next
    // thing Alice sees is a fresh client joining.
    let _carol = TestClient::join(server.addr, "Carol").await;
    assert_eq!(alice.read_line().await, protocol::join_notice("Carol"));

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_registry_is_empty_after_disconnects() {
    let server = start_server().await;

    let mut alice = TestClient::join(server.addr, "Alice").await;
    let mut bob = TestClient::join(server.addr, "Bob").await;
    assert_eq!(alice.read_line().await, protocol::join_notice("Bob"));
    assert_eq!(server.registry.len().await, 2);

    alice.send_line("/quit").await;
    assert_eq!(bob.read_line().await, protocol::leave_notice("Alice"));
    drop(bob);

    // Cleanup is asynchronous; poll until both sessions are reaped.
    for _ in 0..80 {
        if server.registry.is_empty().await {
            break;
        }
        sleep(Duration::from_millis(25)).await;
    }
    assert!(server.registry.is_empty().await);

    let _ = server.shutdown_tx.send(()).await;
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let server = start_server().await;

    server.shutdown_tx.send(()).await.unwrap();

    let result = timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("accept loop should stop on shutdown")
        .unwrap();
    assert!(result.is_ok());
}
