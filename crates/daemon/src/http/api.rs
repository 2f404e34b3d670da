//! REST API handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use protocol::{CreateSessionRequest, CreateSessionResponse, ErrorResponse, ScreenSession};
use serde::{Deserialize, Serialize};

use super::HttpState;
use crate::network::ConnectionSummary;
use crate::session::DirectoryError;

/// Errors returned by the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request was invalid.
    #[error("{0}")]
    BadRequest(String),

    /// The screen command failed.
    #[error("{0}")]
    Internal(String),
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        if err.is_validation() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Number of live bridge connections
    pub connections: usize,
    /// Live bridge connections, longest-lived first
    pub sessions: Vec<ConnectionSummary>,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<HttpState>>) -> Json<HealthResponse> {
    let sessions = state.registry.sessions();
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: sessions.len(),
        sessions,
    })
}

/// GET /api/sessions - List screen sessions
pub async fn list_sessions(
    State(state): State<Arc<HttpState>>,
) -> Result<Json<Vec<ScreenSession>>, ApiError> {
    let listing = state.directory.list().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list screen sessions");
        ApiError::from(e)
    })?;
    Ok(Json(listing.into_sessions()))
}

/// POST /api/sessions - Create a detached screen session
///
/// A missing or unparseable body is treated as a missing name.
pub async fn create_session(
    State(state): State<Arc<HttpState>>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let name = payload
        .and_then(|Json(request)| request.name)
        .unwrap_or_default();

    state.directory.create(&name).await.map_err(|e| {
        if !e.is_validation() {
            tracing::error!(session = %name, error = %e, "Failed to create screen session");
        }
        ApiError::from(e)
    })?;

    Ok(Json(CreateSessionResponse::created(&name)))
}
