//! Connection sessions.
//!
//! A [`ConnectionSession`] binds one client connection to one PTY running
//! `screen -x <name>`. It runs as a single actor task that drains three
//! inputs: PTY events, client events and the shutdown token. Every outgoing
//! frame goes through one outbound channel, so the transport layer never
//! needs to know about session state.
//!
//! ```text
//!  Connecting ──spawn ok──▶ Attached ──detach / client close──▶ Detaching ──▶ Closed
//!      │                       │                                                ▲
//!      └──no name / spawn err──┴──────────── process exit / shutdown ───────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use protocol::{close_codes, ClientMessage, ServerMessage, SESSION_REQUIRED_REASON};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::decoder::Utf8Decoder;
use super::directory::SessionDirectory;
use super::pty::{PtyEvent, PtyProcess, PtySpawner, SessionError, TerminalSize};
use crate::network::registry::{ConnectionRegistry, RegisteredConnection};

/// Close reason sent when the server stops.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Exit code reported when the process never produced one.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Events delivered from the transport to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A text frame.
    Text(String),
    /// The client closed the connection or the transport failed.
    Closed,
}

/// Close frame parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

/// Frames a session asks the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Close the connection; no further frames follow.
    Close(Option<CloseRequest>),
}

/// Lifecycle state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Attached,
    Detaching,
    Closed,
}

/// Timing and key sequence of the detach protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachSettings {
    /// Screen's command prefix, written first by the fallback.
    pub prefix_key: Vec<u8>,
    /// The detach command key, written after the prefix.
    pub detach_key: Vec<u8>,
    /// Wait after a successful native detach.
    pub grace_delay: Duration,
    /// Wait between the prefix and the detach key.
    pub key_delay: Duration,
    /// Wait after the fallback key sequence.
    pub fallback_grace_delay: Duration,
    /// Upper bound on the native detach command; expiry counts as a failure.
    pub command_timeout: Duration,
    /// Upper bound on waiting for the process to report its exit.
    pub exit_wait: Duration,
}

impl Default for DetachSettings {
    fn default() -> Self {
        Self {
            prefix_key: vec![0x01],
            detach_key: b"d".to_vec(),
            grace_delay: Duration::from_millis(100),
            key_delay: Duration::from_millis(100),
            fallback_grace_delay: Duration::from_millis(200),
            command_timeout: Duration::from_secs(2),
            exit_wait: Duration::from_secs(2),
        }
    }
}

/// Per-connection settings shared by all sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Value of `TERM` for the attached process.
    pub term: String,
    /// Terminal size used until the client sends a resize.
    pub default_size: TerminalSize,
    pub detach: DetachSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            default_size: TerminalSize::default(),
            detach: DetachSettings::default(),
        }
    }
}

/// Collaborators every connection session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub directory: SessionDirectory,
    pub spawner: Arc<dyn PtySpawner>,
    pub registry: Arc<ConnectionRegistry>,
    pub settings: Arc<SessionSettings>,
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Exited(i32),
    Detach,
    Shutdown,
}

/// One client connection bound to one PTY.
pub struct ConnectionSession {
    id: Uuid,
    session: Option<String>,
    ctx: SessionContext,
    inbound: mpsc::Receiver<ClientEvent>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    state: SessionState,
    size: TerminalSize,
    pty: Option<Arc<dyn PtyProcess>>,
    decoder: Utf8Decoder,
}

impl ConnectionSession {
    pub fn new(
        id: Uuid,
        session: Option<String>,
        ctx: SessionContext,
        inbound: mpsc::Receiver<ClientEvent>,
        outbound: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        let size = ctx.settings.default_size;
        Self {
            id,
            session,
            ctx,
            inbound,
            outbound,
            cancel,
            state: SessionState::Connecting,
            size,
            pty: None,
            decoder: Utf8Decoder::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Size last requested by the client.
    pub fn terminal_size(&self) -> TerminalSize {
        self.size
    }

    /// Drives the session until it is closed.
    pub async fn run(&mut self) {
        let Some((name, mut events)) = self.attach().await else {
            return;
        };

        let teardown = self.relay(&mut events).await;
        tracing::debug!(connection_id = %self.id, session = %name, ?teardown, "Relay finished");

        let (code, close) = match teardown {
            Teardown::Exited(code) => (code, close_codes::NORMAL),
            Teardown::Detach => {
                self.state = SessionState::Detaching;
                self.detach(&name).await;
                let code = self.kill_and_drain(&mut events).await;
                // Shutdown may have cut the detach short.
                if self.cancel.is_cancelled() {
                    (code, close_codes::GOING_AWAY)
                } else {
                    (code, close_codes::NORMAL)
                }
            }
            Teardown::Shutdown => (self.kill_and_drain(&mut events).await, close_codes::GOING_AWAY),
        };

        self.flush_decoder().await;
        self.send(ServerMessage::Exit { code }).await;
        let reason = if close == close_codes::GOING_AWAY {
            SHUTDOWN_REASON
        } else {
            ""
        };
        self.close(close, reason).await;

        self.ctx.registry.remove(self.id);
        self.state = SessionState::Closed;

        tracing::info!(connection_id = %self.id, session = %name, code, "Connection closed");
    }

    /// Spawns the attach process and registers the connection.
    async fn attach(&mut self) -> Option<(String, mpsc::Receiver<PtyEvent>)> {
        let name = match self.session.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                tracing::warn!(connection_id = %self.id, "Rejecting connection without session name");
                self.close(close_codes::POLICY_VIOLATION, SESSION_REQUIRED_REASON)
                    .await;
                self.state = SessionState::Closed;
                return None;
            }
        };

        let request = self
            .ctx
            .directory
            .attach_request(&name, self.size, &self.ctx.settings.term);

        // Opening the PTY and exec'ing the child are blocking calls.
        let spawner = Arc::clone(&self.ctx.spawner);
        let spawned = tokio::task::spawn_blocking(move || spawner.spawn(&request))
            .await
            .unwrap_or_else(|e| Err(SessionError::SpawnFailed(e.to_string())));

        let spawned = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(connection_id = %self.id, session = %name, error = %e, "Failed to attach");
                self.send(ServerMessage::Error {
                    data: format!("Failed to connect to session: {e}"),
                })
                .await;
                self.close(close_codes::INTERNAL_ERROR, "Failed to connect to session")
                    .await;
                self.state = SessionState::Closed;
                return None;
            }
        };

        self.ctx.registry.insert(
            self.id,
            RegisteredConnection::new(&name, Arc::clone(&spawned.process), self.cancel.clone()),
        );
        self.pty = Some(spawned.process);
        self.state = SessionState::Attached;

        tracing::info!(connection_id = %self.id, session = %name, "Attached to screen session");
        self.send(ServerMessage::Connected {
            session: name.clone(),
        })
        .await;

        Some((name, spawned.events))
    }

    /// Relays traffic in both directions until something ends the session.
    async fn relay(&mut self, events: &mut mpsc::Receiver<PtyEvent>) -> Teardown {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Teardown::Shutdown,

                event = events.recv() => match event {
                    Some(PtyEvent::Output(bytes)) => self.forward_output(&bytes).await,
                    Some(PtyEvent::Exit(code)) => return Teardown::Exited(code),
                    None => return Teardown::Exited(UNKNOWN_EXIT_CODE),
                },

                event = self.inbound.recv() => match event {
                    Some(ClientEvent::Text(text)) => {
                        if self.handle_client_text(&text) {
                            return Teardown::Detach;
                        }
                    }
                    Some(ClientEvent::Closed) | None => return Teardown::Detach,
                },
            }
        }
    }

    /// Applies one client message. Returns true when the client asked to detach.
    fn handle_client_text(&mut self, text: &str) -> bool {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Ignoring malformed client message");
                return false;
            }
        };

        match message {
            ClientMessage::Input { data } => {
                if data.is_empty() {
                    return false;
                }
                if let Some(pty) = &self.pty {
                    if let Err(e) = pty.write(data.as_bytes()) {
                        tracing::warn!(connection_id = %self.id, error = %e, "Failed to write input");
                    }
                }
            }
            ClientMessage::Resize { cols, rows } => {
                let size = TerminalSize::new(cols, rows);
                if !size.is_valid() {
                    tracing::debug!(connection_id = %self.id, cols, rows, "Ignoring empty resize");
                    return false;
                }
                self.size = size;
                if let Some(pty) = &self.pty {
                    if let Err(e) = pty.resize(size) {
                        tracing::warn!(connection_id = %self.id, error = %e, "Failed to resize PTY");
                    }
                }
            }
            ClientMessage::Detach => return true,
        }
        false
    }

    /// Detaches the screen display, falling back to the key sequence.
    async fn detach(&mut self, name: &str) {
        let settings = self.ctx.settings.detach.clone();

        let command = self.ctx.directory.detach(name);
        let outcome = tokio::select! {
            result = tokio::time::timeout(settings.command_timeout, command) => result,
            _ = self.cancel.cancelled() => {
                tracing::debug!(connection_id = %self.id, session = %name, "Shutdown during detach");
                return;
            }
        };

        let failure = match outcome {
            Ok(Ok(())) => {
                self.pause(settings.grace_delay).await;
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", settings.command_timeout),
        };

        tracing::warn!(
            connection_id = %self.id,
            session = %name,
            error = %failure,
            "Native detach failed, sending key sequence"
        );
        self.write_keys(&settings.prefix_key);
        self.pause(settings.key_delay).await;
        self.write_keys(&settings.detach_key);
        self.pause(settings.fallback_grace_delay).await;
    }

    /// Kills the PTY and waits for its exit, forwarding any final output.
    async fn kill_and_drain(&mut self, events: &mut mpsc::Receiver<PtyEvent>) -> i32 {
        if let Some(pty) = self.pty.clone() {
            // Killing may wait out a short grace before escalating.
            match tokio::task::spawn_blocking(move || pty.kill()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "Failed to kill PTY");
                }
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "Kill task failed");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.ctx.settings.detach.exit_wait;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(PtyEvent::Output(bytes))) => self.forward_output(&bytes).await,
                Ok(Some(PtyEvent::Exit(code))) => return code,
                Ok(None) => return UNKNOWN_EXIT_CODE,
                Err(_) => {
                    tracing::warn!(connection_id = %self.id, "Timed out waiting for PTY exit");
                    return UNKNOWN_EXIT_CODE;
                }
            }
        }
    }

    fn write_keys(&self, keys: &[u8]) {
        if let Some(pty) = &self.pty {
            if let Err(e) = pty.write(keys) {
                tracing::debug!(connection_id = %self.id, error = %e, "Failed to write detach keys");
            }
        }
    }

    /// Sleeps, waking early only on shutdown.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    async fn forward_output(&mut self, bytes: &[u8]) {
        let data = self.decoder.decode(bytes);
        if !data.is_empty() {
            self.send(ServerMessage::Output { data }).await;
        }
    }

    async fn flush_decoder(&mut self) {
        let data = self.decoder.finish();
        if !data.is_empty() {
            self.send(ServerMessage::Output { data }).await;
        }
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(Outbound::Message(message)).await.is_err() {
            tracing::debug!(connection_id = %self.id, "Client gone, dropping message");
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        let request = CloseRequest {
            code,
            reason: reason.to_string(),
        };
        if self.outbound.send(Outbound::Close(Some(request))).await.is_err() {
            tracing::debug!(connection_id = %self.id, "Client gone before close");
        }
    }
}
