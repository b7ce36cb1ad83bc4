//! Job status and cancellation.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use docflow_core::{Error, JobStatusResponse};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// GET /api/v1/jobs/:id
///
/// The `message` field is the user-facing rendering of the recorded
/// error class. Internal error strings stay in the `last_error` column
/// and are never exposed here.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", job_id)))?;

    let message = job
        .error_class
        .map(|tag| Error::user_message(tag.into(), job.id));

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        attempt_count: job.attempt_count,
        message,
        degraded: job.degraded,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }))
}

/// POST /api/v1/jobs/:id/cancel
///
/// `cancelled` is false when the job already reached a terminal state.
/// A worker holding a claim on the job observes the cancellation at its
/// next compare-and-swap and abandons the stage.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", job_id)))?;

    let cancelled = state.stores.jobs.cancel(job.id).await?;
    if cancelled {
        info!(job_id = %job.id, "job cancelled");
    }

    Ok(Json(CancelResponse {
        job_id: job.id,
        cancelled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil;
    use docflow_core::{ErrorClass, JobStatus};

    async fn seed_job(state: &crate::state::AppState) -> Uuid {
        let document = state
            .stores
            .documents
            .insert(docflow_core::CreateDocumentRequest {
                owner_id: Uuid::new_v4(),
                content_hash: "blake3:ab".into(),
                storage_key: "objects/x/ab.txt".into(),
                original_filename: "x.txt".into(),
                content_type: "text/plain".into(),
                size_bytes: 2,
            })
            .await
            .unwrap();
        state
            .stores
            .jobs
            .create_for_document(document.id)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_status_for_unknown_job_is_not_found() {
        let state = testutil::state();
        let err = get_job_status(State(state), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_message_hides_internal_error() {
        let state = testutil::state();
        let job_id = seed_job(&state).await;
        state
            .stores
            .jobs
            .record_failure(job_id, "sqlx: connection refused", ErrorClass::TerminalInput)
            .await
            .unwrap();

        let Json(resp) = get_job_status(State(state), Path(job_id)).await.unwrap();

        assert_eq!(resp.status, JobStatus::Failed);
        let message = resp.message.unwrap();
        assert!(message.contains(&job_id.to_string()));
        assert!(!message.contains("sqlx"));
    }

    #[tokio::test]
    async fn test_cancel_applies_once() {
        let state = testutil::state();
        let job_id = seed_job(&state).await;

        let Json(first) = cancel_job(State(state.clone()), Path(job_id)).await.unwrap();
        let Json(second) = cancel_job(State(state.clone()), Path(job_id)).await.unwrap();

        assert!(first.cancelled);
        assert!(!second.cancelled);
        let job = state.stores.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
