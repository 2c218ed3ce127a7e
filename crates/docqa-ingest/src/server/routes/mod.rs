//! HTTP routes for the ingestion server

pub mod batch;
pub mod session;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{delete, get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route("/batch-process", post(batch::batch_process))
        // Uploads get their own body limit
        .route(
            "/upload",
            post(batch::upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/status/:batch_id", get(batch::batch_status))
        .route("/batches", get(batch::list_batches))
        .route("/metrics", get(batch::metrics))
        .route("/cache/:fingerprint", delete(batch::invalidate_cache))
        .route("/auth/login", post(session::login))
        .route("/auth/logout", post(session::logout))
        .route("/session", get(session::current))
        .route("/session/reset", post(session::reset))
        .route("/info", get(info))
}

/// Token from an `Authorization: Bearer ...` header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "docqa-ingest",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /batch-process": "Process PDFs already on disk ({\"paths\": [...]})",
            "POST /upload": "Upload PDFs (multipart) and process them as one batch",
            "GET /status/:batch_id": "Batch progress and results",
            "GET /batches": "List batches",
            "GET /metrics": "Pipeline counters",
            "DELETE /cache/:fingerprint": "Drop a cached result",
            "POST /auth/login": "Open a session",
            "POST /auth/logout": "Close a session",
            "GET /session": "Current session state",
            "POST /session/reset": "Reset session state"
        }
    }))
}
