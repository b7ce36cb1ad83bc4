//! Liveness and queue visibility.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /health
///
/// Reports per-status job counts alongside liveness, so queue depth is
/// observable without a separate metrics surface.
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.stores.jobs.status_counts().await?;
    let mut jobs = serde_json::Map::new();
    for (status, count) in counts {
        jobs.insert(status.as_str().to_string(), json!(count));
    }

    Ok(Json(json!({
        "status": "ok",
        "jobs": jobs,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_health_reports_queue_depth() {
        let state = testutil::state();
        let document = state
            .stores
            .documents
            .insert(docflow_core::CreateDocumentRequest {
                owner_id: Uuid::new_v4(),
                content_hash: "blake3:cd".into(),
                storage_key: "objects/y/cd.txt".into(),
                original_filename: "y.txt".into(),
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
            .unwrap();

        let Json(body) = health(State(state)).await.unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"]["queued"], 1);
    }
}
