//! Batch submission, upload and status endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::MetricsSnapshot;
use crate::processing::RegistryStats;
use crate::server::state::AppState;
use crate::types::document::display_name;
use crate::types::{BatchResult, BatchStage, BatchStatus};

use super::bearer_token;

/// Body of `POST /batch-process`
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub paths: Vec<PathBuf>,
}

/// Response returned once a batch has been accepted
#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub batch_id: Uuid,
    pub status: &'static str,
    pub documents: usize,
    pub files: Vec<String>,
}

/// Batch listing entry without per-document results
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub stage: BatchStage,
    pub total: usize,
    pub processed: usize,
    pub pending: usize,
    pub errors: usize,
    pub percent_complete: f32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&BatchResult> for BatchSummary {
    fn from(batch: &BatchResult) -> Self {
        Self {
            batch_id: batch.batch_id,
            status: batch.status,
            stage: batch.stage,
            total: batch.total,
            processed: batch.processed,
            pending: batch.pending,
            errors: batch.errors,
            percent_complete: batch.percent_complete(),
            started_at: batch.started_at,
            updated_at: batch.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchList {
    pub batches: Vec<BatchSummary>,
    pub stats: RegistryStats,
}

/// POST /batch-process - Start processing files already on disk
pub async fn batch_process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>)> {
    if request.paths.is_empty() {
        return Err(Error::InvalidRequest("no paths provided".to_string()));
    }
    start_batch(&state, &headers, request.paths).await
}

/// POST /upload - Save uploaded PDFs and process them as one batch
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BatchAccepted>)> {
    let upload_dir = state.config().server.upload_dir.clone();
    tokio::fs::create_dir_all(&upload_dir).await?;

    let mut paths = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::InvalidRequest(format!("Failed to read multipart field: {}", e))
    })? {
        let Some(original) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let filename = display_name(std::path::Path::new(&original));

        let data = field.bytes().await.map_err(|e| {
            Error::InvalidRequest(format!("Failed to read {}: {}", filename, e))
        })?;

        let path = upload_dir.join(format!("{}_{}", Uuid::new_v4().simple(), filename));
        tokio::fs::write(&path, &data).await?;
        tracing::info!("Saved upload: {} ({} bytes)", filename, data.len());
        paths.push(path);
    }

    if paths.is_empty() {
        return Err(Error::InvalidRequest("No files provided".to_string()));
    }
    start_batch(&state, &headers, paths).await
}

/// GET /status/:batch_id - Progress and results of one batch
pub async fn batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResult>> {
    state
        .registry()
        .get(batch_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Batch {}", batch_id)))
}

/// GET /batches - Every batch since startup, most recent first
pub async fn list_batches(State(state): State<AppState>) -> Json<BatchList> {
    let registry = state.registry();
    Json(BatchList {
        batches: registry.list().iter().map(BatchSummary::from).collect(),
        stats: registry.stats(),
    })
}

/// GET /metrics - Pipeline counters
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics().snapshot())
}

/// Response of `DELETE /cache/:fingerprint`
#[derive(Debug, Serialize)]
pub struct CacheInvalidated {
    pub fingerprint: String,
    pub removed: bool,
}

/// DELETE /cache/:fingerprint - Forget a cached result so the next batch re-extracts it
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Json<CacheInvalidated>> {
    let removed = state.coordinator().cache().invalidate(&fingerprint).await?;
    tracing::info!("Cache entry {} invalidated (present: {})", fingerprint, removed);
    Ok(Json(CacheInvalidated { fingerprint, removed }))
}

async fn start_batch(
    state: &AppState,
    headers: &HeaderMap,
    paths: Vec<PathBuf>,
) -> Result<(StatusCode, Json<BatchAccepted>)> {
    // Reject a stale token before doing any work
    let session = match bearer_token(headers) {
        Some(token) => Some((token, state.sessions().validate(token).await?)),
        None => None,
    };

    let files: Vec<String> = paths.iter().map(|p| display_name(p)).collect();
    let documents = paths.len();
    let batch_id = state.coordinator().submit(paths);
    tracing::info!("Batch {} accepted with {} documents", batch_id, documents);

    if let Some((token, mut context)) = session {
        context.record_batch(batch_id, &files);
        state.sessions().save(token, context).await?;
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id,
            status: "processing_started",
            documents,
            files,
        }),
    ))
}
