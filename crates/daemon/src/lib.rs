//! # ScreenBridge Daemon Library
//!
//! This crate provides the server side of ScreenBridge: it lets a browser
//! terminal attach to, type into, resize and detach from persistent GNU
//! screen sessions over a WebSocket.
//!
//! ## Overview
//!
//! - **Session Directory**: lists and creates screen sessions via the `screen` CLI
//! - **PTY Handles**: run `screen -x <name>` inside a pseudo-terminal
//! - **Connection Sessions**: one actor per client relaying input, output,
//!   resizes and the detach protocol
//! - **Bridge Server**: WebSocket listener plus the registry of live connections
//! - **HTTP API**: session listing/creation and static assets
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Bridge Orchestrator                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────────┐  │
//! │  │  HTTP API    │   │ Bridge Server │──▶│   Connection    │  │
//! │  │  (axum)      │   │  (WebSocket)  │   │    Registry     │  │
//! │  └──────┬───────┘   └───────┬───────┘   └─────────────────┘  │
//! │         │                   │ one actor per connection       │
//! │  ┌──────▼───────┐   ┌───────▼───────┐                        │
//! │  │   Session    │◀──│  Connection   │──▶ PTY (screen -x)     │
//! │  │  Directory   │   │   Session     │                        │
//! │  └──────────────┘   └───────────────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{BridgeOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = BridgeOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serve until shutdown is requested...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Screen directory, PTY handles and connection sessions
//! - [`network`]: WebSocket bridge and connection registry
//! - [`http`]: REST API and static files
//! - [`orchestrator`]: Component wiring and shutdown

pub mod config;
pub mod http;
pub mod network;
pub mod orchestrator;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    ConnectionSession, DirectoryError, NativePtySpawner, PtyProcess, PtySpawner, SessionContext,
    SessionDirectory, SessionError, SessionListing, SessionSettings, SessionState, TerminalSize,
};

// Re-export network types for convenience
pub use network::{BridgeServer, ConnectionRegistry};

// Re-export orchestrator types for convenience
pub use orchestrator::{BridgeOrchestrator, OrchestratorEvent, OrchestratorState};
