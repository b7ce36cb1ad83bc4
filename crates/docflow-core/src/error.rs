//! Error types and the retry classification taxonomy for docflow.

use thiserror::Error;

use crate::models::JobStatus;

/// Result type alias using docflow's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A key already holds different bytes (content-addressing violation)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External parsing service failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Embedding generation or persistence failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Request queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Request queue backlog is at capacity
    #[error("Queue full: {0} requests already waiting")]
    QueueFull(usize),

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Rejected job state transition
    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    /// Invalid input (malformed document, unsupported type)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Upstream returned a retryable HTTP status (429/5xx)
    #[error("Upstream status {status}: {message}")]
    UpstreamStatus {
        status: u16,
        message: String,
        /// Server-supplied Retry-After delay, if any.
        retry_after_secs: Option<u64>,
    },

    /// Authentication/authorization failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

/// Retry classification for pipeline failures.
///
/// Only the job state machine acts on this: `Transient` schedules a new
/// attempt on the same job, the two terminal classes move the job to
/// `failed`, and `DegradedFallback` lets the job proceed flagged as
/// degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blip, 5xx, rate limit. Retryable with backoff.
    Transient,
    /// Malformed document or unsupported type. Never retried.
    TerminalInput,
    /// Retry budget exhausted on an otherwise-transient class.
    TerminalExhausted,
    /// External parser unusable but local fallback extraction succeeded.
    DegradedFallback,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::TerminalInput => "terminal_input",
            ErrorClass::TerminalExhausted => "terminal_exhausted",
            ErrorClass::DegradedFallback => "degraded_fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(ErrorClass::Transient),
            "terminal_input" => Some(ErrorClass::TerminalInput),
            "terminal_exhausted" => Some(ErrorClass::TerminalExhausted),
            "degraded_fallback" => Some(ErrorClass::DegradedFallback),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for the job state machine.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Error::Database(_)
            | Error::Io(_)
            | Error::Request(_)
            | Error::Timeout(_)
            | Error::Queue(_)
            | Error::QueueFull(_) => ErrorClass::Transient,
            Error::UpstreamStatus { status, .. } => classify_http_status(*status),
            Error::InvalidInput(_) | Error::Serialization(_) => ErrorClass::TerminalInput,
            // Misconfiguration and auth failures must surface, not retry-loop.
            Error::Config(_)
            | Error::Unauthorized(_)
            | Error::Conflict(_)
            | Error::NotFound(_)
            | Error::IllegalTransition { .. } => ErrorClass::TerminalInput,
            Error::Storage(_) | Error::Parse(_) | Error::Embedding(_) | Error::Internal(_) => {
                ErrorClass::Transient
            }
        }
    }

    /// Whether the request queue should retry this error in place.
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }

    /// Server-requested retry delay, when the upstream sent one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::UpstreamStatus {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// User-facing failure message for a given class.
    ///
    /// Never leaks internal error strings; the job id serves as the
    /// stable reference correlating to internal logs.
    pub fn user_message(class: ErrorClass, reference: uuid::Uuid) -> String {
        match class {
            ErrorClass::TerminalInput => format!(
                "The document could not be processed because it is malformed or unsupported (reference {reference})"
            ),
            ErrorClass::TerminalExhausted => format!(
                "Processing is temporarily unavailable; please re-upload later (reference {reference})"
            ),
            ErrorClass::Transient => {
                format!("Processing hit a temporary problem and will be retried (reference {reference})")
            }
            ErrorClass::DegradedFallback => format!(
                "The document was processed with reduced extraction quality (reference {reference})"
            ),
        }
    }
}

/// Classify an upstream HTTP status code.
///
/// 429 and 5xx are transient (retry with backoff); all other 4xx are
/// terminal input errors.
pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::Transient,
        500..=599 => ErrorClass::Transient,
        400..=499 => ErrorClass::TerminalInput,
        _ => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_classify_429_transient() {
        assert_eq!(classify_http_status(429), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_5xx_transient() {
        assert_eq!(classify_http_status(500), ErrorClass::Transient);
        assert_eq!(classify_http_status(502), ErrorClass::Transient);
        assert_eq!(classify_http_status(599), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_4xx_terminal() {
        assert_eq!(classify_http_status(400), ErrorClass::TerminalInput);
        assert_eq!(classify_http_status(415), ErrorClass::TerminalInput);
        assert_eq!(classify_http_status(422), ErrorClass::TerminalInput);
    }

    #[test]
    fn test_invalid_input_is_terminal() {
        let err = Error::InvalidInput("unsupported type".into());
        assert_eq!(err.classify(), ErrorClass::TerminalInput);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_request_error_is_transient() {
        let err = Error::Request("connection reset".into());
        assert_eq!(err.classify(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_error_not_retryable() {
        // Misconfiguration must not masquerade as a document-level failure.
        let err = Error::Config("missing endpoint".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_upstream_status_carries_retry_after() {
        let err = Error::UpstreamStatus {
            status: 429,
            message: "slow down".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(err.retry_after_secs(), Some(7));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_class_round_trip() {
        for class in [
            ErrorClass::Transient,
            ErrorClass::TerminalInput,
            ErrorClass::TerminalExhausted,
            ErrorClass::DegradedFallback,
        ] {
            assert_eq!(ErrorClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(ErrorClass::parse("bogus"), None);
    }

    #[test]
    fn test_user_message_has_reference_not_internals() {
        let id = Uuid::new_v4();
        let msg = Error::user_message(ErrorClass::TerminalExhausted, id);
        assert!(msg.contains(&id.to_string()));
        assert!(!msg.contains("sqlx"));
    }

    #[test]
    fn test_queue_full_display() {
        let err = Error::QueueFull(64);
        assert_eq!(err.to_string(), "Queue full: 64 requests already waiting");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
