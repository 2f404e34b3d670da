//! Bridge message definitions for ScreenBridge.
//!
//! This module defines the JSON messages exchanged over the terminal
//! WebSocket. Every message is a single text frame holding one JSON object
//! whose `type` field selects the variant.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// WebSocket close codes used by the bridge.
pub mod close_codes {
    /// The connection completed its purpose (detach or process exit).
    pub const NORMAL: u16 = 1000;
    /// The server is going down.
    pub const GOING_AWAY: u16 = 1001;
    /// The client violated the connection policy (missing session name).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// The server could not attach to the requested session.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Close reason sent when the connection address carries no session name.
pub const SESSION_REQUIRED_REASON: &str = "Session name required";

/// Messages sent from the browser client to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Keystrokes or pasted text to forward verbatim to the terminal.
    Input {
        /// Raw input, usually a handful of characters or an escape sequence.
        data: String,
    },
    /// The client's terminal viewport changed size.
    Resize {
        /// New width in columns.
        cols: u16,
        /// New height in rows.
        rows: u16,
    },
    /// Leave the screen session running and release this connection.
    Detach,
}

impl ClientMessage {
    /// Parses a client message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent from the bridge to the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// The bridge attached to the named session.
    Connected {
        /// The session the connection is bound to.
        session: String,
    },
    /// Terminal output, to be interpreted by the client as ANSI text.
    Output {
        /// UTF-8 decoded output bytes.
        data: String,
    },
    /// The attached process terminated; always the last message on a connection.
    Exit {
        /// Process exit code.
        code: i32,
    },
    /// Attaching to the session failed.
    Error {
        /// Human-readable failure description.
        data: String,
    },
}

impl ServerMessage {
    /// Parses a server message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the value of the `type` tag for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Output { .. } => "output",
            ServerMessage::Exit { .. } => "exit",
            ServerMessage::Error { .. } => "error",
        }
    }
}
