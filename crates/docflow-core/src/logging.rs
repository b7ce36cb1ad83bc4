//! Structured logging field name constants for docflow.
//!
//! All crates use these constants for consistent structured logging
//! fields, so log aggregation tools can query by standardized names
//! across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback or retry applied |
//! | INFO  | Lifecycle events (startup, shutdown), stage completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (chunks, staged vectors) |

/// Correlation ID propagated across request, job, and sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the event.
/// Values: "api", "db", "parse", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name, e.g. "submit", "poll", "promote".
pub const OPERATION: &str = "op";

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job status at the time of the event.
pub const JOB_STATUS: &str = "job_status";

/// External parsing-service reference id.
pub const EXTERNAL_REF: &str = "external_ref";

/// Object store key.
pub const STORAGE_KEY: &str = "storage_key";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of staged embeddings promoted.
pub const PROMOTED_COUNT: &str = "promoted_count";

/// Attempt number for retried operations.
pub const ATTEMPT: &str = "attempt";

/// Error classification (see `ErrorClass`).
pub const ERROR_CLASS: &str = "error_class";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
