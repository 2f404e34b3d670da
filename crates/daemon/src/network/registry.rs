//! Registry of live bridge connections.
//!
//! Every attached connection is recorded here together with its PTY handle
//! and cancellation token so the shutdown path can reach all of them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::PtyProcess;

/// Unique identifier for a bridge connection.
pub type ConnectionId = Uuid;

/// A live connection as seen by the registry.
#[derive(Clone)]
pub struct RegisteredConnection {
    /// Name of the screen session the connection is attached to.
    pub session: String,
    /// The PTY running `screen -x` for this connection.
    pub pty: Arc<dyn PtyProcess>,
    /// Cancels the connection's actor.
    pub cancel: CancellationToken,
    /// When the connection attached.
    pub connected_at: Instant,
}

impl RegisteredConnection {
    pub fn new(session: impl Into<String>, pty: Arc<dyn PtyProcess>, cancel: CancellationToken) -> Self {
        Self {
            session: session.into(),
            pty,
            cancel,
            connected_at: Instant::now(),
        }
    }
}

/// Snapshot of a registered connection, as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub session: String,
    pub pid: Option<u32>,
    /// Whole seconds since the connection attached.
    pub connected_secs: u64,
}

/// Thread-safe map of connection id to live connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, RegisteredConnection>,
    removed: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly attached connection.
    pub fn insert(&self, id: ConnectionId, connection: RegisteredConnection) {
        tracing::debug!(connection_id = %id, session = %connection.session, "Registered connection");
        self.connections.insert(id, connection);
    }

    /// Removes a connection. Returns false if it was not registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Unregistered connection");
            self.removed.notify_waiters();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns a snapshot of all live connections, longest-lived first.
    pub fn sessions(&self) -> Vec<ConnectionSummary> {
        let mut sessions: Vec<_> = self
            .connections
            .iter()
            .map(|entry| ConnectionSummary {
                id: *entry.key(),
                session: entry.session.clone(),
                pid: entry.pty.pid(),
                connected_secs: entry.connected_at.elapsed().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| b.connected_secs.cmp(&a.connected_secs));
        sessions
    }

    /// Kills every PTY and cancels every connection.
    ///
    /// Entries are left in place; each connection removes itself once its
    /// actor has finished. Returns the number of connections signalled.
    pub fn shutdown_all(&self) -> usize {
        let targets: Vec<(ConnectionId, Arc<dyn PtyProcess>, CancellationToken)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.pty), entry.cancel.clone()))
            .collect();

        // Cancel first so no actor starts a detach while the kills run.
        for (_, _, cancel) in &targets {
            cancel.cancel();
        }
        for (id, pty, _) in &targets {
            if let Err(e) = pty.kill() {
                tracing::warn!(connection_id = %id, error = %e, "Failed to kill PTY during shutdown");
            }
        }

        tracing::info!(count = targets.len(), "Signalled all connections to shut down");
        targets.len()
    }

    /// Waits until no connections remain. Returns false on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let removed = self.removed.notified();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, removed).await.is_err() {
                return self.is_empty();
            }
        }
    }
}
