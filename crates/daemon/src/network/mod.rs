//! Network module.
//!
//! This module provides the WebSocket bridge listener and the registry of
//! live connections it feeds.

pub mod bridge;
pub mod registry;

pub use bridge::{session_from_query, BridgeServer};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSummary, RegisteredConnection};
