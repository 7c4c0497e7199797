//! Session management - per-connection state and the outbound writer task

use crate::protocol;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth per client. A client that stops reading for long
/// enough to fill this simply loses messages rather than stalling broadcasts
/// to everyone else.
pub const OUTBOUND_BUFFER: usize = 256;

/// Server-side state for one connected client.
///
/// The session is shared behind an `Arc`: the registry and in-flight
/// broadcast snapshots hold clones, while the connection's own task drives
/// the lifecycle. Only that task closes the session.
pub struct Session {
    /// Unique session identifier, assigned at connection time
    id: Uuid,

    /// Display name; starts as the fallback name and is replaced at most
    /// once, during the handshake
    name: RwLock<String>,

    /// Queue feeding this client's writer task
    outbound: mpsc::Sender<String>,

    /// Set once the read loop has ended; sends become no-ops
    closed: AtomicBool,

    /// When the connection was accepted
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Create a session with its fallback display name and outbound queue.
    pub fn new(fallback_name: String, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: RwLock::new(fallback_name),
            outbound,
            closed: AtomicBool::new(false),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current display name. The fallback until the handshake settles it.
    pub fn display_name(&self) -> String {
        match self.name.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Settle the display name from the client's handshake line. Whitespace
    /// is trimmed; an empty proposal keeps the fallback. Called once, by the
    /// session's own loop.
    pub fn set_display_name(&self, proposed: &str) {
        let mut name = match self.name.write() {
            Ok(name) => name,
            Err(poisoned) => poisoned.into_inner(),
        };
        let chosen = protocol::choose_name(proposed, name.as_str());
        *name = chosen;
    }

    /// Enqueue one line for delivery to this client.
    ///
    /// Never fails from the caller's point of view: a closed session, a full
    /// queue, or a writer task that already died all drop the message
    /// silently. The session's own read loop notices a dead peer on its next
    /// cycle and runs cleanup.
    pub fn send(&self, line: impl Into<String>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.outbound.try_send(line.into()) {
            tracing::debug!(id = %self.id, "dropping outbound line: {}", e);
        }
    }

    /// Idempotent transition to the closed state.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Drains a session's outbound queue onto the socket, one `\n`-terminated
/// line at a time. Runs until every sender handle is dropped (remaining
/// queued lines are still delivered first) or a write fails, then closes the
/// write half.
pub async fn writer_task(mut writer: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<String>) {
    while let Some(line) = outbound_rx.recv().await {
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        if let Err(e) = writer.write_all(&buf).await {
            tracing::debug!("client write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!("client flush failed: {}", e);
            break;
        }
    }

    tracing::debug!("client writer task finished");
}
