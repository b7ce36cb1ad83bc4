//! Parsing-service webhook receiver.
//!
//! The service calls back when an external parse finishes. The same
//! job may also be resolved by a worker poll; both paths finalize
//! through the one compare-and-swap on `awaiting_external`, so a
//! duplicate or racing delivery acknowledges without acting.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use docflow_core::{derive_parsed_key, Document, ErrorClass, JobStatus, WebhookPayload};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub job_id: Uuid,
    /// False when the delivery was a duplicate or arrived after the
    /// job left the awaiting state.
    pub applied: bool,
}

/// POST /api/v1/webhooks/parse/:job_id
pub async fn receive_parse_webhook(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<WebhookAck>, ApiError> {
    let payload: WebhookPayload = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed webhook payload: {}", e)))?;

    let job = state
        .stores
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", job_id)))?;

    if job.status != JobStatus::AwaitingExternal {
        info!(
            job_id = %job.id,
            status = %job.status.as_str(),
            "webhook for job not awaiting external result, acknowledged without acting"
        );
        return Ok(Json(WebhookAck {
            job_id: job.id,
            applied: false,
        }));
    }

    let document = state.stores.documents.get(job.document_id).await?;

    let applied = match payload {
        WebhookPayload::Success { result_reference } => {
            let parsed = state.parser.fetch_result(&result_reference).await?;
            store_parsed_text(&state, &document, &parsed.text).await?;
            let applied = state
                .stores
                .jobs
                .transition(job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
                .await?;
            if applied {
                info!(job_id = %job.id, "external parse result applied via webhook");
            }
            applied
        }
        WebhookPayload::Error { error_detail } => {
            let detail =
                error_detail.unwrap_or_else(|| "parsing service reported failure".to_string());
            warn!(job_id = %job.id, detail = %detail, "parsing service reported failure via webhook");

            let data = state.stores.storage.get(&document.storage_key).await?;
            match state.parser.try_fallback(&data, &document.content_type) {
                Some(parsed) => {
                    store_parsed_text(&state, &document, &parsed.text).await?;
                    let applied = state
                        .stores
                        .jobs
                        .transition(job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
                        .await?;
                    if applied {
                        state.stores.jobs.set_degraded(job.id).await?;
                    }
                    applied
                }
                None => {
                    // Guarded on the job still awaiting: a worker poll
                    // that already resolved this job wins, and the late
                    // failure report is discarded.
                    state
                        .stores
                        .jobs
                        .fail_from(
                            job.id,
                            JobStatus::AwaitingExternal,
                            &detail,
                            ErrorClass::TerminalInput,
                        )
                        .await?
                }
            }
        }
    };

    Ok(Json(WebhookAck {
        job_id: job.id,
        applied,
    }))
}

/// Write parsed text to its content-addressed key. A concurrent
/// resolution of the same document already wrote identical text, so a
/// conflict from the store is a no-op here.
async fn store_parsed_text(
    state: &AppState,
    document: &Document,
    text: &str,
) -> Result<(), ApiError> {
    let key = derive_parsed_key(&document.content_hash, document.owner_id)?;
    match state.stores.storage.put(&key, text.as_bytes()).await {
        Ok(()) => Ok(()),
        Err(docflow_core::Error::Conflict(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
