//! Centralized default constants for the docflow system.
//!
//! **This module is the single source of truth** for shared default
//! values. Crates reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum tokens per chunk.
pub const CHUNK_MAX_TOKENS: usize = 256;

/// Token overlap between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP_TOKENS: usize = 32;

/// How far (in characters) the chunker searches backwards for a
/// sentence/paragraph boundary before falling back to a hard cut.
pub const CHUNK_BOUNDARY_WINDOW: usize = 200;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension.
pub const EMBED_DIMENSION: usize = 384;

/// Maximum concurrent embedding generations per document.
pub const EMBED_CONCURRENCY: usize = 4;

/// Staged-embedding promotion batch size.
pub const PROMOTION_BATCH_SIZE: usize = 128;

// =============================================================================
// REQUEST QUEUE
// =============================================================================

/// Maximum concurrent in-flight calls to the parsing service.
pub const MAX_CONCURRENT_REQUESTS: usize = 4;

/// Minimum spacing between dispatches, to smooth bursts below the
/// external service's rate limit.
pub const MIN_DISPATCH_INTERVAL_MS: u64 = 250;

/// Maximum queued (not yet dispatched) operations before fast-failing.
pub const MAX_QUEUE_DEPTH: usize = 64;

/// Per-operation retry budget inside the queue.
pub const MAX_RETRIES: u32 = 3;

/// Exponential backoff base delay.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Backoff cap.
pub const BACKOFF_CAP_MS: u64 = 30_000;

// =============================================================================
// PARSER ORCHESTRATION
// =============================================================================

/// Poll interval while awaiting an external parse result.
pub const POLL_INTERVAL_MS: u64 = 2_000;

/// Maximum poll attempts before `await_result` times out.
pub const POLL_MAX_ATTEMPTS: u32 = 90;

/// Per-request timeout against the parsing service.
pub const PARSE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default parsing-service endpoint.
pub const PARSE_BASE_URL: &str = "http://localhost:9100";

// =============================================================================
// JOBS
// =============================================================================

/// Maximum job-level attempts before terminal-exhausted failure.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Worker polling interval when the queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Hard timeout for a single pipeline stage (seconds).
pub const STAGE_TIMEOUT_SECS: u64 = 300;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// UPLOADS
// =============================================================================

/// Maximum accepted upload size in bytes (50 MB).
pub const UPLOAD_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Content types accepted by the upload endpoint.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "text/html",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3400;
