//! Bridge orchestrator for wiring together all components.
//!
//! This module provides the `BridgeOrchestrator` that owns the connection
//! registry, binds the HTTP and WebSocket listeners, and runs the shutdown
//! path that tears every connection down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::{create_router, HttpServer, HttpState};
use crate::network::{BridgeServer, ConnectionRegistry};
use crate::session::{NativePtySpawner, PtySpawner, SessionContext, SessionDirectory};

/// Extra time allowed for connections to unregister beyond the exit wait.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Bridge orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding listeners.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// Both listeners are bound.
    Listening { http: SocketAddr, ws: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Owns the bridge's components and their lifecycle.
pub struct BridgeOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Front end to the screen CLI.
    directory: SessionDirectory,
    /// Starts attach processes.
    spawner: Arc<dyn PtySpawner>,
    /// Live bridge connections.
    registry: Arc<ConnectionRegistry>,
    /// Cancelled to stop both listeners and every connection.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
    http_addr: Option<SocketAddr>,
    ws_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeOrchestrator {
    /// Creates an orchestrator that drives the real screen binary.
    pub fn new(config: Config) -> Result<Self> {
        let directory = SessionDirectory::new(config.session.screen_binary.clone());
        Self::with_components(config, directory, Arc::new(NativePtySpawner::new()))
    }

    /// Creates an orchestrator with the given directory and spawner.
    pub fn with_components(
        config: Config,
        directory: SessionDirectory,
        spawner: Arc<dyn PtySpawner>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            directory,
            spawner,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_token: CancellationToken::new(),
            event_tx,
            http_addr: None,
            ws_addr: None,
            tasks: Vec::new(),
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Bound HTTP address, once started.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Bound WebSocket address, once started.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds both listeners and starts serving.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting bridge orchestrator...");

        match self.bind_and_spawn().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to start bridge: {:#}", e);
                self.emit_event(OrchestratorEvent::Error {
                    message: format!("{e:#}"),
                });
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e);
            }
        }

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Bridge orchestrator started successfully");
        Ok(())
    }

    async fn bind_and_spawn(&mut self) -> Result<()> {
        let http_addr = self.config.server.http_socket_addr()?;
        let ws_addr = self.config.server.ws_socket_addr()?;

        self.shutdown_token = CancellationToken::new();

        let ctx = SessionContext {
            directory: self.directory.clone(),
            spawner: Arc::clone(&self.spawner),
            registry: Arc::clone(&self.registry),
            settings: Arc::new(self.config.session_settings()),
        };

        let bridge = BridgeServer::bind(ws_addr, ctx)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {ws_addr}"))?;

        let router = create_router(
            Arc::new(HttpState {
                directory: self.directory.clone(),
                registry: Arc::clone(&self.registry),
            }),
            &self.config.server.static_dir,
        );
        let http = HttpServer::bind(http_addr, router)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {http_addr}"))?;

        let bound_http = http.local_addr()?;
        let bound_ws = bridge.local_addr()?;
        self.http_addr = Some(bound_http);
        self.ws_addr = Some(bound_ws);

        let token = self.shutdown_token.clone();
        self.tasks.push(tokio::spawn(async move {
            bridge.run(token).await;
        }));

        let token = self.shutdown_token.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = http.run(token).await {
                error!("HTTP server failed: {}", e);
            }
        }));

        info!(http = %bound_http, ws = %bound_ws, "Bridge listening");
        self.emit_event(OrchestratorEvent::Listening {
            http: bound_http,
            ws: bound_ws,
        });
        Ok(())
    }

    /// Stops accepting, shuts every connection down and waits for them.
    ///
    /// Connections are killed without running the detach protocol; the
    /// screen sessions themselves keep running.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Running {
                debug!("Stop requested while {:?}, nothing to do", *state);
                return Ok(());
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::ShuttingDown));

        info!("Stopping bridge orchestrator...");

        // Signal shutdown to the listeners and every connection
        self.shutdown_token.cancel();
        // Kills can block briefly while escalating to SIGKILL.
        let registry = Arc::clone(&self.registry);
        match tokio::task::spawn_blocking(move || registry.shutdown_all()).await {
            Ok(signalled) => debug!("Signalled {} connections", signalled),
            Err(e) => warn!("Shutdown task failed: {}", e),
        }

        let drain = Duration::from_millis(self.config.detach.exit_wait_ms) + SHUTDOWN_GRACE;
        if !self.registry.wait_until_empty(drain).await {
            warn!(
                "{} connections still registered after {:?}",
                self.registry.len(),
                drain
            );
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Listener task failed: {}", e);
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Bridge orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.server.http_addr = "127.0.0.1:0".to_string();
        config.server.ws_addr = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let orchestrator = BridgeOrchestrator::new(create_test_config()).unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.http_addr().is_none());
        assert!(orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = create_test_config();
        config.daemon.log_level = "chatty".to_string();
        assert!(BridgeOrchestrator::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut orchestrator = BridgeOrchestrator::new(create_test_config()).unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);

        let http = orchestrator.http_addr().unwrap();
        let ws = orchestrator.ws_addr().unwrap();
        assert_ne!(http.port(), 0);
        assert_ne!(ws.port(), 0);
        assert_ne!(http.port(), ws.port());

        assert!(orchestrator.start().await.is_err(), "double start must fail");

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.shutdown_token().is_cancelled());

        // Listeners are closed after stop.
        assert!(tokio::net::TcpStream::connect(ws).await.is_err());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::StateChanged(state) = event {
                seen.push(state);
            }
        }
        assert_eq!(
            seen,
            vec![
                OrchestratorState::Starting,
                OrchestratorState::Running,
                OrchestratorState::ShuttingDown,
                OrchestratorState::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut orchestrator = BridgeOrchestrator::new(create_test_config()).unwrap();
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_start() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = create_test_config();
        config.server.ws_addr = occupied.local_addr().unwrap().to_string();

        let mut orchestrator = BridgeOrchestrator::new(config).unwrap();
        let err = orchestrator.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("WebSocket listener"));
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }
}
