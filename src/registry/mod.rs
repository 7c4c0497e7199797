//! Live session membership and broadcast fan-out
//!
//! The [`Registry`] is the only state shared between connection tasks. All
//! mutation goes through [`Registry::add`] and [`Registry::remove`] under a
//! short write lock; [`Registry::snapshot`] clones the member list under a
//! read lock so broadcast iteration proceeds entirely outside the lock.
//! A broadcast may therefore miss a client that joins or leaves mid-flight,
//! which is fine: no cross-client ordering is promised.

use crate::server::Session;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The set of sessions currently eligible to receive broadcasts.
///
/// One instance per server, shared by handle. Sessions are registered as soon
/// as the connection is accepted, before name negotiation completes.
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Ids are assigned per connection, so a duplicate
    /// means a caller bug.
    pub async fn add(&self, session: Arc<Session>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id()) {
            bail!("session {} already registered", session.id());
        }
        sessions.insert(session.id(), session);
        Ok(())
    }

    /// Deregister a session. Removing an absent id is a no-op; cleanup paths
    /// may run more than once per disconnect. Returns whether the session was
    /// still present.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Point-in-time copy of the membership. The returned vector is owned by
    /// the caller; iterating it never blocks concurrent add/remove.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Delivers a message to every live session in the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Send `text` to every open session in the current snapshot.
    ///
    /// `exclude` suppresses one recipient; the server passes `None` so
    /// senders hear their own messages echoed back. One session's failed
    /// send never affects delivery to the rest: [`Session::send`] swallows
    /// transport trouble and the session is reaped by its own read loop.
    pub async fn broadcast(&self, text: &str, exclude: Option<Uuid>) {
        let snapshot = self.registry.snapshot().await;
        let mut recipients = 0;
        for session in &snapshot {
            if session.is_closed() {
                continue;
            }
            if exclude == Some(session.id()) {
                continue;
            }
            session.send(text);
            recipients += 1;
        }
        tracing::debug!(recipients, "broadcast: {}", text);
    }
}
