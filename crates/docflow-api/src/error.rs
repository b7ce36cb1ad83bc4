//! HTTP error mapping.
//!
//! Handlers return [`ApiError`]; the `From` impl translates domain
//! errors into status codes so `?` works directly on repository and
//! orchestrator calls.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use docflow_core::UploadRejection;

#[derive(Debug)]
pub enum ApiError {
    Internal(docflow_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    Unavailable(String),
}

impl From<docflow_core::Error> for ApiError {
    fn from(err: docflow_core::Error) -> Self {
        match &err {
            docflow_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            docflow_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            docflow_core::Error::Conflict(msg) => ApiError::Conflict(msg.clone()),
            docflow_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg.clone()),
            docflow_core::Error::QueueFull(_) => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err),
        }
    }
}

impl From<UploadRejection> for ApiError {
    fn from(rejection: UploadRejection) -> Self {
        match &rejection {
            UploadRejection::TooLarge { .. } => ApiError::PayloadTooLarge(rejection.to_string()),
            UploadRejection::InvalidType(_) => {
                ApiError::UnsupportedMediaType(rejection.to_string())
            }
            UploadRejection::Empty => ApiError::BadRequest(rejection.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err: ApiError = docflow_core::Error::NotFound("job x".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_queue_full_maps_to_503() {
        let err: ApiError = docflow_core::Error::QueueFull(64).into();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[test]
    fn test_oversize_upload_maps_to_413() {
        let err: ApiError = UploadRejection::TooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }
}
