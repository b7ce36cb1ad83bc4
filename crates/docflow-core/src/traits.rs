//! Repository traits for the ingestion pipeline.
//!
//! These define the interfaces concrete backends must satisfy,
//! enabling pluggable persistence (PostgreSQL in production, the
//! in-memory set in tests) without touching pipeline logic.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ErrorClass, Result};
use crate::models::*;

/// Request for creating a new document record.
#[derive(Debug, Clone)]
pub struct CreateDocumentRequest {
    pub owner_id: Uuid,
    pub content_hash: String,
    pub storage_key: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// A not-yet-persisted chunk produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub sequence_index: i32,
    pub text: String,
    pub content_hash: String,
    pub token_count: i32,
}

/// Outcome of an idempotent chunk-set replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// False when the incoming set was byte-identical and no writes occurred.
    pub written: bool,
    pub chunk_count: usize,
}

/// Repository for document records.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a new document.
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Document>;

    /// Fetch a document by id.
    async fn get(&self, id: Uuid) -> Result<Document>;

    /// Find a non-deleted document by owner and content hash.
    async fn get_by_hash(&self, owner_id: Uuid, content_hash: &str) -> Result<Option<Document>>;

    /// Soft-delete a document.
    async fn soft_delete(&self, id: Uuid) -> Result<()>;
}

/// Repository for job records and the persisted state machine.
///
/// The repository is the only writer of `Job.status`; every change goes
/// through a conditional update so concurrent workers cannot race a job
/// into an inconsistent state.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create the job for a freshly uploaded document (status `queued`).
    async fn create_for_document(&self, document_id: Uuid) -> Result<Job>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Fetch the job for a document.
    async fn get_for_document(&self, document_id: Uuid) -> Result<Option<Job>>;

    /// Find a non-terminal job whose document matches `(owner, hash)`.
    /// Used for duplicate-in-flight detection at upload time.
    async fn find_active_for_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Job>>;

    /// Claim the next job whose status is in `claimable`, atomically
    /// moving it to its in-progress status. At most one claimer wins.
    async fn claim_next(&self, claimable: &[JobStatus]) -> Result<Option<Job>>;

    /// Compare-and-swap transition. Returns `Ok(true)` if applied,
    /// `Ok(false)` if the row was no longer in `from` (lost race, a
    /// no-op for the caller), and an error if `from -> to` is not in
    /// the transition table at all.
    async fn transition(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool>;

    /// Record the external reference once submission succeeds.
    async fn set_external_reference(&self, job_id: Uuid, reference: &str) -> Result<()>;

    /// Flag that the degraded fallback extraction produced the text.
    async fn set_degraded(&self, job_id: Uuid) -> Result<()>;

    /// Record a stage failure. Transient errors under the attempt
    /// budget roll the job back to its last completed state for retry;
    /// terminal classes (or an exhausted budget) move it to `failed`.
    /// Returns the job's resulting status.
    async fn record_failure(
        &self,
        job_id: Uuid,
        error: &str,
        class: ErrorClass,
    ) -> Result<JobStatus>;

    /// Record a terminal failure only while the job is still in `from`.
    /// Used by paths that hold no claim on the job (the webhook
    /// receiver): a concurrent worker may have already advanced it, and
    /// a failure written then would clobber a successful resolution.
    /// Returns whether the write applied; a lost race is `Ok(false)`
    /// and leaves the row untouched.
    async fn fail_from(
        &self,
        job_id: Uuid,
        from: JobStatus,
        error: &str,
        class: ErrorClass,
    ) -> Result<bool>;

    /// Cancel a job if it has not reached a terminal state.
    /// Returns whether the cancellation was applied.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;

    /// Count of jobs per status, for health reporting.
    async fn status_counts(&self) -> Result<Vec<(JobStatus, i64)>>;
}

/// Repository for chunk storage.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Replace the chunk set for a document.
    ///
    /// Idempotent on byte-identical reprocessing: when the incoming
    /// set's content hashes match the stored set in order, no writes
    /// occur and `written` is false.
    async fn replace_for_document(
        &self,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<ReplaceOutcome>;

    /// List chunks for a document ordered by `sequence_index`.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Fetch a single chunk.
    async fn get(&self, chunk_id: Uuid) -> Result<Option<Chunk>>;
}

/// Repository for the embedding write buffer and durable storage.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    /// Stage a (chunk, vector) pair in the transient buffer.
    /// Safe to call repeatedly for the same chunk (upsert).
    async fn stage(&self, chunk_id: Uuid, document_id: Uuid, vector: Vec<f32>) -> Result<()>;

    /// Atomically promote all staged entries for a document into
    /// durable storage and clear them from the buffer, skipping any
    /// chunk already durable. Idempotent; returns the number promoted.
    async fn promote_all_for(&self, document_id: Uuid) -> Result<u64>;

    /// Fetch the durable embedding for a chunk.
    async fn get(&self, chunk_id: Uuid) -> Result<Option<EmbeddingRecord>>;

    /// Number of durable embeddings for a document.
    async fn durable_count_for(&self, document_id: Uuid) -> Result<i64>;

    /// Number of staged (not yet promoted) entries for a document.
    async fn staged_count_for(&self, document_id: Uuid) -> Result<i64>;
}
