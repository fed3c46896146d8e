//! API routes for the docsift server

pub mod documents;
pub mod tasks;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};

use crate::monitoring::MonitoringSnapshot;
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Upload - with larger body limit for file uploads
        .route(
            "/documents",
            post(documents::submit_document).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Task status
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/:id", get(tasks::get_task))
        // Monitoring
        .route("/monitoring", get(monitoring))
        .route("/dependencies", get(dependencies))
        // Info
        .route("/info", get(info))
}

/// GET /api/monitoring - Pools, queues, I/O, memory and health in one snapshot
async fn monitoring(State(state): State<AppState>) -> Json<MonitoringSnapshot> {
    Json(state.monitor().snapshot())
}

/// GET /api/dependencies - Which host tools the fallback can use
async fn dependencies(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state
        .orchestrator()
        .engine()
        .dependencies()
        .check_system_dependencies()
        .await;
    Json(serde_json::json!({
        "dependencies": report,
        "conversionSupported": report.conversion_supported(),
        "preferredBackend": report.preferred_backend().map(|b| b.to_string()),
        "missing": report.missing_message(),
    }))
}

/// API info endpoint
async fn info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "docsift",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document text extraction with direct PDF parsing and convert+OCR fallback",
        "endpoints": {
            "POST /api/documents": "Upload a document (multipart: file, options)",
            "GET /api/tasks": "List tasks (optional ?status=)",
            "GET /api/tasks/:id": "Get task status, progress and result",
            "GET /api/monitoring": "Pool, queue, I/O and memory statistics",
            "GET /api/dependencies": "Host conversion and OCR tools",
        },
        "supportedTypes": crate::types::FileKind::SUPPORTED_EXTENSIONS,
    }))
}
