//! Document upload and retrieval.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use docflow_core::validation::sanitize_filename;
use docflow_core::{
    compute_content_hash, derive_key, validate_upload, Chunk, CreateDocumentRequest,
    EmbeddingRecord, UploadResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

/// JSON upload body. File bytes travel base64-encoded so the endpoint
/// stays plain JSON end to end.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub data: String,
}

/// POST /api/v1/documents
///
/// Validates, stores, and enqueues. Returns 201 with the new ids, or
/// 200 with the existing ids when the same owner already has this
/// exact content uploaded (in flight or complete).
pub async fn upload_document(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let data = BASE64
        .decode(req.data.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 payload: {}", e)))?;
    validate_upload(&req.content_type, &data)?;
    let content_hash = compute_content_hash(&data);

    // Same bytes already being processed for this owner: hand back the
    // in-flight job instead of forking a second pipeline run.
    if let Some(job) = state
        .stores
        .jobs
        .find_active_for_hash(req.owner_id, &content_hash)
        .await?
    {
        let document = state.stores.documents.get(job.document_id).await?;
        info!(
            document_id = %document.id,
            job_id = %job.id,
            "upload deduplicated against in-flight job"
        );
        return Ok((
            StatusCode::OK,
            Json(UploadResponse {
                document_id: document.id,
                job_id: job.id,
                storage_key: document.storage_key,
                duplicate_in_flight: true,
            }),
        ));
    }

    // Already ingested to a terminal state: idempotent re-upload.
    if let Some(document) = state
        .stores
        .documents
        .get_by_hash(req.owner_id, &content_hash)
        .await?
    {
        if let Some(job) = state.stores.jobs.get_for_document(document.id).await? {
            return Ok((
                StatusCode::OK,
                Json(UploadResponse {
                    document_id: document.id,
                    job_id: job.id,
                    storage_key: document.storage_key,
                    duplicate_in_flight: false,
                }),
            ));
        }
    }

    let filename = sanitize_filename(&req.filename);
    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let storage_key = derive_key(&content_hash, extension, req.owner_id)?;

    state.stores.storage.put(&storage_key, &data).await?;

    let document = state
        .stores
        .documents
        .insert(CreateDocumentRequest {
            owner_id: req.owner_id,
            content_hash,
            storage_key: storage_key.clone(),
            original_filename: filename,
            content_type: req.content_type,
            size_bytes: data.len() as i64,
        })
        .await?;
    let job = state.stores.jobs.create_for_document(document.id).await?;

    info!(
        document_id = %document.id,
        job_id = %job.id,
        size_bytes = data.len(),
        "document accepted for ingestion"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document_id: document.id,
            job_id: job.id,
            storage_key,
            duplicate_in_flight: false,
        }),
    ))
}

/// GET /api/v1/documents/:id/chunks
pub async fn list_document_chunks(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<Chunk>>, ApiError> {
    let document = state.stores.documents.get(document_id).await?;
    let chunks = state
        .stores
        .chunks
        .list_for_document(document.id)
        .await?;
    Ok(Json(chunks))
}

/// GET /api/v1/chunks/:id/embedding
pub async fn get_chunk_embedding(
    State(state): State<AppState>,
    Path(chunk_id): Path<Uuid>,
) -> Result<Json<EmbeddingRecord>, ApiError> {
    let chunk = state
        .stores
        .chunks
        .get(chunk_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chunk {} not found", chunk_id)))?;
    let record = state
        .stores
        .embeddings
        .get(chunk.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no embedding for chunk {}", chunk_id)))?;
    Ok(Json(record))
}
