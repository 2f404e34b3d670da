//! HTTP API bodies for session management.

use serde::{Deserialize, Serialize};

/// A screen session as reported by `screen -ls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSession {
    /// Process id of the screen server.
    pub pid: String,
    /// Session name given at creation.
    pub name: String,
    /// Raw status text, e.g. `Attached` or `Detached`.
    pub status: String,
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Successful response to `POST /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    pub message: String,
}

impl CreateSessionResponse {
    /// Builds the response for a newly created session.
    pub fn created(name: &str) -> Self {
        Self {
            success: true,
            message: format!("Session '{name}' created"),
        }
    }
}

/// Error body returned by every API endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
