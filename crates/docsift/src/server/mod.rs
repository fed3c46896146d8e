//! HTTP server for the document pipeline

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::monitoring::{HealthReport, HealthStatus};
use crate::orchestrator::ProcessingOrchestrator;
use state::AppState;

/// Docsift HTTP server
pub struct DocsiftServer {
    config: PipelineConfig,
    state: AppState,
}

impl DocsiftServer {
    pub fn new(config: PipelineConfig, orchestrator: Arc<ProcessingOrchestrator>) -> Self {
        let state = AppState::new(config.clone(), orchestrator);
        Self { config, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            // API routes with body limit for multipart uploads
            .nest("/api", routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            // Middleware layers (order matters - applied bottom to top)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Serve until `shutdown` resolves, then stop accepting connections and let
    /// in-flight requests finish
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        tracing::info!("Starting docsift server on http://{}", addr);
        tracing::info!("API documentation: http://{}/api/info", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Health check endpoint: composite score, 503 when critical
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.monitor().report();
    let status = match report.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

/// Readiness check endpoint: 200 while uploads are accepted, with the host tool report
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let dependencies = state
        .orchestrator()
        .engine()
        .dependencies()
        .check_system_dependencies()
        .await;
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "ready": ready,
            "conversionSupported": dependencies.conversion_supported(),
            "dependencies": dependencies,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn server() -> (tempfile::TempDir, DocsiftServer) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.resources.temp_dir = dir.path().to_path_buf();
        let orchestrator = Arc::new(ProcessingOrchestrator::new(&config));
        (dir, DocsiftServer::new(config, orchestrator))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_score() {
        let (_dir, server) = server();
        let response = server
            .build_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["score"].as_f64().unwrap() > 0.0);
        assert!(json["components"]["extractionPool"].is_object());
    }

    #[tokio::test]
    async fn test_ready_until_stopped() {
        let (_dir, server) = server();
        let router = server.build_router();

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        server.state().orchestrator().stop_accepting();
        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let (_dir, server) = server();
        let uri = format!("/api/tasks/{}", uuid::Uuid::new_v4());
        let response = server
            .build_router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_type() {
        let (_dir, server) = server();
        let boundary = "docsift-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.docx\"\r\n\
             Content-Type: application/octet-stream\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::post("/api/documents")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap();

        let response = server.build_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(server.state().orchestrator().list_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_upload_accepts_pdf() {
        let (dir, server) = server();
        let boundary = "docsift-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"options\"\r\n\r\n\
             {{\"generateSummary\":false}}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"report.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\nnot really a pdf\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::post("/api/documents")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap();

        let response = server.build_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "pending");
        let task_id: uuid::Uuid = json["taskId"].as_str().unwrap().parse().unwrap();

        let task = server
            .state()
            .orchestrator()
            .wait_for_task(task_id, std::time::Duration::from_secs(30))
            .await
            .unwrap();
        assert!(task.is_terminal());
        assert_eq!(task.file_type, "application/pdf");
        assert!(dir.path().join("uploads").exists());
    }
}
