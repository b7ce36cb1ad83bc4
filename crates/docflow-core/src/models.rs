//! Core data model for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorClass;

/// One uploaded file. Immutable after creation except for soft-delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Hash of the raw bytes, `blake3:<hex>`.
    pub content_hash: String,
    /// Content-addressed object-store key. A pure function of
    /// `(content_hash, extension, owner_id)`, never of wall-clock time.
    pub storage_key: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Processing lifecycle state of one document's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Submitting,
    AwaitingExternal,
    Parsed,
    Chunking,
    Chunked,
    Embedding,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Submitting => "submitting",
            JobStatus::AwaitingExternal => "awaiting_external",
            JobStatus::Parsed => "parsed",
            JobStatus::Chunking => "chunking",
            JobStatus::Chunked => "chunked",
            JobStatus::Embedding => "embedding",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "submitting" => Some(JobStatus::Submitting),
            "awaiting_external" => Some(JobStatus::AwaitingExternal),
            "parsed" => Some(JobStatus::Parsed),
            "chunking" => Some(JobStatus::Chunking),
            "chunked" => Some(JobStatus::Chunked),
            "embedding" => Some(JobStatus::Embedding),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The owner may cancel any job that has not finished.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative processing record for one document.
///
/// Exactly one job exists per document at a time; retried attempts
/// mutate this row rather than creating new ones. `status` is owned by
/// the job state machine; other components request transitions, they
/// never write it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Internal error detail of the last failure, for logs/operators.
    pub last_error: Option<String>,
    /// Classification of the last failure.
    pub error_class: Option<ErrorClassTag>,
    /// Opaque id assigned by the parsing service; null until submission
    /// succeeds.
    pub external_reference: Option<String>,
    /// True when the degraded local extraction path produced the text.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serializable wrapper for [`ErrorClass`] on persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassTag {
    Transient,
    TerminalInput,
    TerminalExhausted,
    DegradedFallback,
}

impl From<ErrorClass> for ErrorClassTag {
    fn from(c: ErrorClass) -> Self {
        match c {
            ErrorClass::Transient => ErrorClassTag::Transient,
            ErrorClass::TerminalInput => ErrorClassTag::TerminalInput,
            ErrorClass::TerminalExhausted => ErrorClassTag::TerminalExhausted,
            ErrorClass::DegradedFallback => ErrorClassTag::DegradedFallback,
        }
    }
}

impl From<ErrorClassTag> for ErrorClass {
    fn from(t: ErrorClassTag) -> Self {
        match t {
            ErrorClassTag::Transient => ErrorClass::Transient,
            ErrorClassTag::TerminalInput => ErrorClass::TerminalInput,
            ErrorClassTag::TerminalExhausted => ErrorClass::TerminalExhausted,
            ErrorClassTag::DegradedFallback => ErrorClass::DegradedFallback,
        }
    }
}

/// A bounded span of parsed text belonging to one document.
///
/// `(document_id, sequence_index)` is unique; `content_hash` lets
/// reprocessing detect byte-identical chunk sets and skip rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub sequence_index: i32,
    pub text: String,
    pub content_hash: String,
    pub token_count: i32,
}

/// A staged, not-yet-durable (chunk, vector) pair in the write buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedEmbedding {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub vector: Vec<f32>,
    pub staged_at: DateTime<Utc>,
}

/// Durable (chunk, vector) pair. Unique per chunk, insert-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: Uuid,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// External parsing-service outcome, parsed at the webhook boundary.
///
/// Anything that does not match this closed shape is rejected before it
/// reaches the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "external_status", rename_all = "snake_case")]
pub enum WebhookPayload {
    Success {
        result_reference: String,
    },
    Error {
        #[serde(default)]
        error_detail: Option<String>,
    },
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub job_id: Uuid,
    pub storage_key: String,
    /// True when the same owner already has this exact content in a
    /// non-terminal job; `job_id` then names that original job.
    #[serde(default)]
    pub duplicate_in_flight: bool,
}

/// Public projection of a job for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempt_count: i32,
    /// User-facing message; internal error strings are never exposed.
    pub message: Option<String>,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parsed output returned by the parsing service (or the fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedText {
    pub text: String,
    /// True when produced by the degraded local extraction path.
    #[serde(default)]
    pub degraded: bool,
}
