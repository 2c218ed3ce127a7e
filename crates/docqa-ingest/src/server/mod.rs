//! HTTP server for batch ingestion

pub mod routes;
pub mod state;

use axum::{http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Ingestion HTTP server
pub struct IngestServer {
    config: IngestConfig,
    state: AppState,
}

impl IngestServer {
    pub async fn new(config: IngestConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Serve an already assembled state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config().clone(),
            state,
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .merge(routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.server.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        tracing::info!("Starting ingestion server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(state: axum::extract::State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::session::{secret_digest, InMemorySessions};
    use crate::test_support::{pdf_bytes, write_corrupt, write_pdf};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    const BOUNDARY: &str = "docqa-test-boundary";

    fn test_state(upload_dir: &std::path::Path) -> AppState {
        let mut config = IngestConfig::default();
        config.server.upload_dir = upload_dir.to_path_buf();
        config.processing.chunk_size = 2;

        let mut users = HashMap::new();
        users.insert("ana".to_string(), secret_digest("s3cret"));
        let sessions = Arc::new(InMemorySessions::new(users, Duration::from_secs(60)));

        let state = AppState::from_parts(config, Arc::new(MemoryBackend::new()), sessions);
        state.set_ready(true);
        state
    }

    fn router(state: &AppState) -> Router {
        IngestServer::with_state(state.clone()).build_router()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_batch(state: &AppState, batch_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = send(router(state), get(&format!("/status/{}", batch_id))).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] != "processing" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("batch {} did not finish", batch_id);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = router(&state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.set_ready(false);
        let response = router(&state).oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let uri = format!("/status/{}", uuid::Uuid::new_v4());
        let (status, body) = send(router(&state), get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found");

        let response = router(&state).oneshot(get("/status/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_process_then_poll_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir.path().join("uploads"));
        let paths = vec![
            write_pdf(dir.path(), "a.pdf", 3),
            write_corrupt(dir.path(), "b.pdf"),
        ];

        let (status, body) = send(
            router(&state),
            post_json("/batch-process", json!({ "paths": paths }), None),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing_started");
        assert_eq!(body["documents"], 2);

        let batch_id = body["batch_id"].as_str().unwrap().to_string();
        let finished = wait_for_batch(&state, &batch_id).await;
        assert_eq!(finished["status"], "complete");
        assert_eq!(finished["stage"], "done");
        assert_eq!(finished["processed"], 1);
        assert_eq!(finished["errors"], 1);
        assert_eq!(finished["results"][0]["status"], "success");
        assert_eq!(finished["results"][1]["error"]["kind"], "extraction");

        let (_, list) = send(router(&state), get("/batches")).await;
        assert_eq!(list["batches"].as_array().unwrap().len(), 1);
        assert_eq!(list["stats"]["complete"], 1);

        let (_, metrics) = send(router(&state), get("/metrics")).await;
        assert_eq!(metrics["batches_completed"], 1);
        assert_eq!(metrics["extraction_invocations"], 2);
    }

    #[tokio::test]
    async fn test_cache_invalidation_forces_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir.path().join("uploads"));
        let paths = vec![write_pdf(dir.path(), "a.pdf", 2)];

        let first = assert_ok!(state.coordinator().process(paths.clone()).await);
        let fingerprint = first.results[0].fingerprint.clone().unwrap();

        let request = Request::delete(format!("/cache/{}", fingerprint))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router(&state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], true);

        let second = assert_ok!(state.coordinator().process(paths).await);
        assert!(!second.results[0].cached);
        assert_eq!(state.metrics().snapshot().extraction_invocations, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (status, body) = send(
            router(&state),
            post_json("/batch-process", json!({ "paths": [] }), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_upload_saves_and_processes() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");
        let state = test_state(&upload_dir);

        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"../report.pdf\"\r\nContent-Type: application/pdf\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(&pdf_bytes(4));
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, accepted) = send(router(&state), request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["documents"], 1);

        let saved: Vec<_> = std::fs::read_dir(&upload_dir).unwrap().collect();
        assert_eq!(saved.len(), 1);
        let name = saved[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().ends_with("_report.pdf"));

        let batch_id = accepted["batch_id"].as_str().unwrap().to_string();
        let finished = wait_for_batch(&state, &batch_id).await;
        assert_eq!(finished["processed"], 1);
        assert_eq!(finished["results"][0]["nodes"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_session_records_batches() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let doc = write_pdf(dir.path(), "notes.pdf", 1);

        let (status, _) = send(
            router(&state),
            post_json("/auth/login", json!({"username": "ana", "password": "nope"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, login) = send(
            router(&state),
            post_json("/auth/login", json!({"username": "ana", "password": "s3cret"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = login["token"].as_str().unwrap().to_string();

        let (status, accepted) = send(
            router(&state),
            post_json("/batch-process", json!({ "paths": [doc] }), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let context = assert_ok!(state.sessions().validate(&token).await);
        assert_eq!(
            context.last_batch_id.map(|id| id.to_string()),
            accepted["batch_id"].as_str().map(str::to_string)
        );
        assert_eq!(context.file_name.as_deref(), Some("notes.pdf"));

        let (status, reset) = send(router(&state), post_json("/session/reset", json!({}), Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(reset["last_batch_id"].is_null());

        let (status, _) = send(router(&state), post_json("/auth/logout", json!({}), Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_err!(state.sessions().validate(&token).await);

        // A stale token is rejected before any work starts
        let (status, _) = send(
            router(&state),
            post_json("/batch-process", json!({ "paths": [doc] }), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(state.registry().list().len(), 1);
    }
}
