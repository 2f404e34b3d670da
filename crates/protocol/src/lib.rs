//! # ScreenBridge Protocol Library
//!
//! This crate provides the wire definitions shared by the ScreenBridge daemon
//! and its browser clients.
//!
//! ## Overview
//!
//! The bridge speaks two small protocols:
//!
//! - **Bridge Messages**: JSON text frames exchanged over the terminal
//!   WebSocket (`input`, `resize`, `detach` from the client; `connected`,
//!   `output`, `exit`, `error` from the server)
//! - **HTTP API Bodies**: request and response bodies for listing and
//!   creating screen sessions
//!
//! ```text
//! ┌──────────────┐   ?session=work    ┌──────────────┐   screen -x work   ┌────────┐
//! │   Browser    │ ─────────────────▶ │    Bridge    │ ─────────────────▶ │  PTY   │
//! │ (xterm.js)   │ ◀───── output ──── │   (daemon)   │ ◀──── bytes ────── │        │
//! └──────────────┘                    └──────────────┘                    └────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let msg = ClientMessage::from_json(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
//! assert_eq!(msg, ClientMessage::Resize { cols: 120, rows: 40 });
//!
//! let reply = ServerMessage::Connected { session: "work".to_string() };
//! assert_eq!(reply.to_json().unwrap(), r#"{"type":"connected","session":"work"}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Bridge message definitions and close codes
//! - [`api`]: HTTP API request/response bodies
//! - [`error`]: Error types

pub mod api;
pub mod error;
pub mod messages;

pub use api::{CreateSessionRequest, CreateSessionResponse, ErrorResponse, ScreenSession};
pub use error::{ProtocolError, Result};
pub use messages::{close_codes, ClientMessage, ServerMessage, SESSION_REQUIRED_REASON};
