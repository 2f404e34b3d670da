//! HTTP server module

mod api;

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::network::ConnectionRegistry;
use crate::session::SessionDirectory;

pub use api::{ApiError, HealthResponse};

/// State shared by the API handlers.
pub struct HttpState {
    pub directory: SessionDirectory,
    pub registry: Arc<ConnectionRegistry>,
}

/// Create the HTTP router with all routes configured.
///
/// Paths outside `/api` are served from `static_dir`.
pub fn create_router(state: Arc<HttpState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route(
            "/api/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}

/// HTTP listener for the session API and static assets.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    pub async fn bind(addr: SocketAddr, router: Router) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(addr = %addr, "HTTP listening");
        }

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::directory::tests::FakeScreen;
    use crate::session::CommandOutput;
    use axum_test::TestServer;
    use serde_json::{json, Value};

    fn test_server(static_dir: &Path) -> (Arc<FakeScreen>, TestServer) {
        let fake = Arc::new(FakeScreen::default());
        let state = Arc::new(HttpState {
            directory: SessionDirectory::with_runner(fake.clone(), "screen"),
            registry: Arc::new(ConnectionRegistry::new()),
        });
        let server = TestServer::new(create_router(state, static_dir)).unwrap();
        (fake, server)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (_, server) = test_server(dir.path());

        let response = server.get("/api/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({"status": "ok", "connections": 0, "sessions": []}));
    }

    #[tokio::test]
    async fn test_list_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (_, server) = test_server(dir.path());

        let response = server.get("/api/sessions").await;
        response.assert_status_ok();
        response.assert_json(&json!([]));
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let (_, server) = test_server(dir.path());

        let response = server
            .post("/api/sessions")
            .json(&json!({"name": "work"}))
            .await;
        response.assert_status_ok();
        response.assert_json(&json!({"success": true, "message": "Session 'work' created"}));

        let sessions: Value = server.get("/api/sessions").await.json();
        assert_eq!(sessions[0]["name"], "work");
        assert_eq!(sessions[0]["status"], "Detached");
        assert!(sessions[0]["pid"].is_string());
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, server) = test_server(dir.path());

        for body in [json!({}), json!({"name": ""})] {
            let response = server.post("/api/sessions").json(&body).await;
            response.assert_status(axum::http::StatusCode::BAD_REQUEST);
            response.assert_json(&json!({"error": "Session name is required"}));
        }

        let response = server.post("/api/sessions").text("not json").await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);

        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, server) = test_server(dir.path());
        fake.fail(
            "-ls",
            CommandOutput {
                code: Some(2),
                stdout: String::new(),
                stderr: "permission denied".to_string(),
            },
        );

        let response = server.get("/api/sessions").await;
        response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>bridge</h1>").unwrap();
        let (_, server) = test_server(dir.path());

        let response = server.get("/index.html").await;
        response.assert_status_ok();
        response.assert_text("<h1>bridge</h1>");

        let root = server.get("/").await;
        root.assert_status_ok();

        let missing = server.get("/nope.js").await;
        missing.assert_status(axum::http::StatusCode::NOT_FOUND);
    }
}
