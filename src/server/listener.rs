//! TCP listener, accept loop, and the per-connection session loop

use super::session::{writer_task, Session, OUTBOUND_BUFFER};
use crate::config::ServerConfig;
use crate::protocol;
use crate::registry::{Broadcaster, Registry};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// TCP server listener owning the registry for its lifetime.
///
/// Each instance is self-contained, so tests can run several servers in one
/// process on ephemeral ports.
pub struct ServerListener {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl ServerListener {
    /// Bind the listening socket. A bind failure is fatal; there is no
    /// server without a port.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to this server's session registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Run the accept loop. Each accepted connection gets its own task; the
    /// loop itself never waits on any session. It ends only on a shutdown
    /// signal, and in-flight sessions are left to finish on their own.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        tracing::info!("listening on {}", self.listener.local_addr()?);

        let broadcaster = Broadcaster::new(Arc::clone(&self.registry));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown signal received");
                    break;
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let registry = Arc::clone(&self.registry);
                            let broadcaster = broadcaster.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, peer, registry, broadcaster).await {
                                    tracing::error!("client {} error: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Per-connection session loop: handshake, relay, cleanup.
///
/// Every exit path, including I/O failure anywhere, runs the same
/// termination sequence, so the leave notice goes out exactly once per
/// connection and the registry ends up clean.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let session = Arc::new(Session::new(protocol::fallback_name(peer.port()), outbound_tx));
    let session_id = session.id();

    tracing::info!(id = %session_id, %peer, "client connected");

    let writer_handle = tokio::spawn(writer_task(writer, outbound_rx));

    // Registered before the name is settled. A broadcast arriving mid-handshake
    // just sits in the outbound queue until the client reads it.
    registry.add(Arc::clone(&session)).await?;

    let mut lines = BufReader::new(reader).lines();

    if negotiate_name(&session, &mut lines).await {
        let name = session.display_name();
        session.send(protocol::greeting(&name));
        broadcaster.broadcast(&protocol::join_notice(&name), None).await;

        if let Err(e) = relay_lines(&session, &mut lines, &broadcaster).await {
            tracing::warn!(id = %session_id, name = %session.display_name(), "connection error: {}", e);
        }
    }

    // Terminating: the leave notice is unconditional, so a client that
    // vanished before naming itself still departs under its fallback name.
    let name = session.display_name();
    broadcaster.broadcast(&protocol::leave_notice(&name), None).await;
    session.mark_closed();
    if registry.remove(session_id).await {
        tracing::info!(
            id = %session_id,
            name = %name,
            connected_at = %session.connected_at(),
            "client disconnected"
        );
    }

    // Drop the last sender so the writer drains the queued leave notice and
    // closes the socket.
    drop(session);
    let _ = writer_handle.await;

    Ok(())
}

/// Handshake: prompt for a name and read one line. Returns false if the peer
/// went away first, in which case the caller skips straight to termination.
async fn negotiate_name(session: &Session, lines: &mut Lines<BufReader<OwnedReadHalf>>) -> bool {
    session.send(protocol::NAME_PROMPT);
    match lines.next_line().await {
        Ok(Some(proposed)) => {
            session.set_display_name(&proposed);
            true
        }
        Ok(None) => false,
        Err(e) => {
            tracing::debug!(id = %session.id(), "handshake read failed: {}", e);
            false
        }
    }
}

/// Active state: relay each non-empty line until the quit command,
/// end-of-stream, or a read error.
async fn relay_lines(
    session: &Session,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    broadcaster: &Broadcaster,
) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if protocol::is_quit(line) {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let message = protocol::chat_line(&session.display_name(), line);
        broadcaster.broadcast(&message, None).await;
    }
    Ok(())
}
