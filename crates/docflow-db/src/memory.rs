//! In-memory repository implementations.
//!
//! Behaviorally equivalent to the PostgreSQL repositories for the
//! semantics the pipeline depends on (compare-and-swap transitions,
//! single-winner claims, idempotent promotion), backed by a shared
//! `MemoryStore`. Used by worker and API tests; not intended for
//! production.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use docflow_core::{
    defaults, state, Chunk, ChunkRepository, CreateDocumentRequest, Document, DocumentRepository,
    EmbeddingRecord, EmbeddingRepository, Error, ErrorClass, ErrorClassTag, Job, JobRepository,
    JobStatus, NewChunk, ReplaceOutcome, Result,
};

use crate::object_store::StorageBackend;

/// Shared backing state for the in-memory repositories.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Uuid, Document>>,
    jobs: Mutex<HashMap<Uuid, Job>>,
    poll_after: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    chunks: Mutex<HashMap<Uuid, Chunk>>,
    staged: Mutex<HashMap<Uuid, (Uuid, Vec<f32>)>>,
    durable: Mutex<HashMap<Uuid, EmbeddingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// In-memory DocumentRepository.
pub struct MemoryDocumentRepository {
    store: Arc<MemoryStore>,
}

impl MemoryDocumentRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Document> {
        let doc = Document {
            id: Uuid::now_v7(),
            owner_id: req.owner_id,
            content_hash: req.content_hash,
            storage_key: req.storage_key,
            original_filename: req.original_filename,
            content_type: req.content_type,
            size_bytes: req.size_bytes,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.store
            .documents
            .lock()
            .unwrap()
            .insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn get(&self, id: Uuid) -> Result<Document> {
        self.store
            .documents
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Document {} not found", id)))
    }

    async fn get_by_hash(&self, owner_id: Uuid, content_hash: &str) -> Result<Option<Document>> {
        Ok(self
            .store
            .documents
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                d.owner_id == owner_id && d.content_hash == content_hash && d.deleted_at.is_none()
            })
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut documents = self.store.documents.lock().unwrap();
        match documents.get_mut(&id) {
            Some(doc) if doc.deleted_at.is_none() => {
                doc.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(Error::NotFound(format!("Document {} not found", id))),
        }
    }
}

/// In-memory JobRepository.
pub struct MemoryJobRepository {
    store: Arc<MemoryStore>,
    poll_hold_ms: i64,
}

impl MemoryJobRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            poll_hold_ms: defaults::POLL_INTERVAL_MS as i64,
        }
    }

    pub fn with_poll_hold_ms(mut self, ms: i64) -> Self {
        self.poll_hold_ms = ms;
        self
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create_for_document(&self, document_id: Uuid) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::now_v7(),
            document_id,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            last_error: None,
            error_class: None,
            external_reference: None,
            degraded: false,
            created_at: now,
            updated_at: now,
        };
        self.store.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.store.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn get_for_document(&self, document_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .store
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.document_id == document_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn find_active_for_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Job>> {
        let documents = self.store.documents.lock().unwrap();
        let jobs = self.store.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .filter(|j| {
                documents.get(&j.document_id).is_some_and(|d| {
                    d.owner_id == owner_id
                        && d.content_hash == content_hash
                        && d.deleted_at.is_none()
                })
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn claim_next(&self, claimable: &[JobStatus]) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.store.jobs.lock().unwrap();
        let mut poll_after = self.store.poll_after.lock().unwrap();

        let candidate = jobs
            .values()
            .filter(|j| claimable.contains(&j.status))
            .filter(|j| {
                j.status != JobStatus::AwaitingExternal
                    || poll_after.get(&j.id).is_none_or(|t| *t <= now)
            })
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).unwrap();
        if job.status == JobStatus::AwaitingExternal {
            poll_after.insert(id, now + Duration::milliseconds(self.poll_hold_ms));
        } else if let Some(target) = state::claim_target(job.status) {
            job.status = target;
        }
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn transition(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        state::check_transition(from, to)?;

        let mut jobs = self.store.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == from => {
                job.status = to;
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn set_external_reference(&self, job_id: Uuid, reference: &str) -> Result<()> {
        let mut jobs = self.store.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;
        job.external_reference = Some(reference.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_degraded(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.store.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;
        job.degraded = true;
        job.error_class = Some(ErrorClassTag::DegradedFallback);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        error: &str,
        class: ErrorClass,
    ) -> Result<JobStatus> {
        let mut jobs = self.store.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;

        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let new_count = job.attempt_count + 1;
        let (next_status, recorded_class) = match class {
            ErrorClass::Transient if new_count < job.max_attempts => {
                (state::rollback_on_retry(job.status), ErrorClass::Transient)
            }
            ErrorClass::Transient => (JobStatus::Failed, ErrorClass::TerminalExhausted),
            ErrorClass::TerminalInput => (JobStatus::Failed, ErrorClass::TerminalInput),
            ErrorClass::TerminalExhausted => (JobStatus::Failed, ErrorClass::TerminalExhausted),
            ErrorClass::DegradedFallback => (job.status, ErrorClass::DegradedFallback),
        };

        job.status = next_status;
        job.attempt_count = new_count;
        job.last_error = Some(error.to_string());
        job.error_class = Some(recorded_class.into());
        job.updated_at = Utc::now();
        self.store.poll_after.lock().unwrap().remove(&job_id);
        Ok(next_status)
    }

    async fn fail_from(
        &self,
        job_id: Uuid,
        from: JobStatus,
        error: &str,
        class: ErrorClass,
    ) -> Result<bool> {
        state::check_transition(from, JobStatus::Failed)?;

        let mut jobs = self.store.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;

        if job.status != from {
            return Ok(false);
        }

        job.status = JobStatus::Failed;
        job.attempt_count += 1;
        job.last_error = Some(error.to_string());
        job.error_class = Some(class.into());
        job.updated_at = Utc::now();
        self.store.poll_after.lock().unwrap().remove(&job_id);
        Ok(true)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.store.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn status_counts(&self) -> Result<Vec<(JobStatus, i64)>> {
        let jobs = self.store.jobs.lock().unwrap();
        let mut counts: HashMap<JobStatus, i64> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_default() += 1;
        }
        let mut out: Vec<_> = counts.into_iter().collect();
        out.sort_by_key(|(s, _)| s.as_str());
        Ok(out)
    }
}

/// In-memory ChunkRepository.
pub struct MemoryChunkRepository {
    store: Arc<MemoryStore>,
}

impl MemoryChunkRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChunkRepository for MemoryChunkRepository {
    async fn replace_for_document(
        &self,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<ReplaceOutcome> {
        let mut map = self.store.chunks.lock().unwrap();

        let mut existing: Vec<&Chunk> = map
            .values()
            .filter(|c| c.document_id == document_id)
            .collect();
        existing.sort_by_key(|c| c.sequence_index);

        let incoming: Vec<&str> = chunks.iter().map(|c| c.content_hash.as_str()).collect();
        if !existing.is_empty()
            && existing
                .iter()
                .map(|c| c.content_hash.as_str())
                .eq(incoming.iter().copied())
        {
            return Ok(ReplaceOutcome {
                written: false,
                chunk_count: chunks.len(),
            });
        }

        map.retain(|_, c| c.document_id != document_id);
        let chunk_count = chunks.len();
        for chunk in chunks {
            let row = Chunk {
                id: Uuid::now_v7(),
                document_id,
                sequence_index: chunk.sequence_index,
                text: chunk.text,
                content_hash: chunk.content_hash,
                token_count: chunk.token_count,
            };
            map.insert(row.id, row);
        }
        Ok(ReplaceOutcome {
            written: true,
            chunk_count,
        })
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let map = self.store.chunks.lock().unwrap();
        let mut chunks: Vec<Chunk> = map
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);
        Ok(chunks)
    }

    async fn get(&self, chunk_id: Uuid) -> Result<Option<Chunk>> {
        Ok(self.store.chunks.lock().unwrap().get(&chunk_id).cloned())
    }
}

/// In-memory EmbeddingRepository.
pub struct MemoryEmbeddingRepository {
    store: Arc<MemoryStore>,
}

impl MemoryEmbeddingRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EmbeddingRepository for MemoryEmbeddingRepository {
    async fn stage(&self, chunk_id: Uuid, document_id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.store
            .staged
            .lock()
            .unwrap()
            .insert(chunk_id, (document_id, vector));
        Ok(())
    }

    async fn promote_all_for(&self, document_id: Uuid) -> Result<u64> {
        let mut staged = self.store.staged.lock().unwrap();
        let mut durable = self.store.durable.lock().unwrap();

        let mut promoted = 0u64;
        let chunk_ids: Vec<Uuid> = staged
            .iter()
            .filter(|(_, (doc, _))| *doc == document_id)
            .map(|(id, _)| *id)
            .collect();

        for chunk_id in chunk_ids {
            let (_, vector) = staged.remove(&chunk_id).unwrap();
            // Already-durable chunks are skipped, matching
            // ON CONFLICT DO NOTHING semantics.
            if let std::collections::hash_map::Entry::Vacant(entry) = durable.entry(chunk_id) {
                entry.insert(EmbeddingRecord {
                    chunk_id,
                    vector,
                    created_at: Utc::now(),
                });
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn get(&self, chunk_id: Uuid) -> Result<Option<EmbeddingRecord>> {
        Ok(self.store.durable.lock().unwrap().get(&chunk_id).cloned())
    }

    async fn durable_count_for(&self, document_id: Uuid) -> Result<i64> {
        let durable = self.store.durable.lock().unwrap();
        let chunks = self.store.chunks.lock().unwrap();
        Ok(durable
            .keys()
            .filter(|id| {
                chunks
                    .get(id)
                    .is_some_and(|c| c.document_id == document_id)
            })
            .count() as i64)
    }

    async fn staged_count_for(&self, document_id: Uuid) -> Result<i64> {
        Ok(self
            .store
            .staged
            .lock()
            .unwrap()
            .values()
            .filter(|(doc, _)| *doc == document_id)
            .count() as i64)
    }
}

/// In-memory StorageBackend with the same conflict semantics as the
/// filesystem backend.
#[derive(Default)]
pub struct MemoryStorageBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        if let Some(existing) = objects.get(key) {
            if existing == data {
                return Ok(());
            }
            return Err(Error::Conflict(format!(
                "key {} already holds different content",
                key
            )));
        }
        objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object {} not found", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repos() -> (
        Arc<MemoryStore>,
        MemoryDocumentRepository,
        MemoryJobRepository,
    ) {
        let store = MemoryStore::new();
        (
            store.clone(),
            MemoryDocumentRepository::new(store.clone()),
            MemoryJobRepository::new(store),
        )
    }

    fn doc_request(owner: Uuid, hash: &str) -> CreateDocumentRequest {
        CreateDocumentRequest {
            owner_id: owner,
            content_hash: hash.to_string(),
            storage_key: format!("objects/{}/{}.txt", owner, hash),
            original_filename: "report.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 42,
        }
    }

    #[tokio::test]
    async fn test_claim_moves_queued_to_submitting() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:aa"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();

        let claimed = jobs.claim_next(state::CLAIMABLE).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Submitting);

        // Nothing else claimable.
        assert!(jobs.claim_next(state::CLAIMABLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_cas_single_winner() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:bb"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();
        jobs.transition(job.id, JobStatus::Queued, JobStatus::Submitting)
            .await
            .unwrap();
        jobs.transition(job.id, JobStatus::Submitting, JobStatus::AwaitingExternal)
            .await
            .unwrap();

        // Webhook and poll loop race the same finalization.
        let first = jobs
            .transition(job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
            .await
            .unwrap();
        let second = jobs
            .transition(job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_fail_from_loses_race_to_successful_resolution() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:ee"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();
        jobs.transition(job.id, JobStatus::Queued, JobStatus::Submitting)
            .await
            .unwrap();
        jobs.transition(job.id, JobStatus::Submitting, JobStatus::AwaitingExternal)
            .await
            .unwrap();

        // Poll loop resolves the parse first.
        assert!(jobs
            .transition(job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
            .await
            .unwrap());

        // A late failure report guarded on awaiting_external must not
        // clobber the resolved job.
        let applied = jobs
            .fail_from(
                job.id,
                JobStatus::AwaitingExternal,
                "service reported failure",
                ErrorClass::TerminalInput,
            )
            .await
            .unwrap();
        assert!(!applied);

        let job = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Parsed);
        assert_eq!(job.attempt_count, 0);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn test_fail_from_applies_while_awaiting() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:ef"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();
        jobs.transition(job.id, JobStatus::Queued, JobStatus::Submitting)
            .await
            .unwrap();
        jobs.transition(job.id, JobStatus::Submitting, JobStatus::AwaitingExternal)
            .await
            .unwrap();

        let applied = jobs
            .fail_from(
                job.id,
                JobStatus::AwaitingExternal,
                "encrypted document",
                ErrorClass::TerminalInput,
            )
            .await
            .unwrap();
        assert!(applied);

        let job = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_class, Some(ErrorClassTag::TerminalInput));
        assert_eq!(job.last_error.as_deref(), Some("encrypted document"));
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:cc"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();

        let err = jobs
            .transition(job.id, JobStatus::Queued, JobStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_record_failure_retries_then_exhausts() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:dd"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();
        assert_eq!(job.max_attempts, 3);

        // Two transient failures roll back to queued for retry.
        jobs.claim_next(state::CLAIMABLE).await.unwrap().unwrap();
        let s = jobs
            .record_failure(job.id, "connection reset", ErrorClass::Transient)
            .await
            .unwrap();
        assert_eq!(s, JobStatus::Queued);

        jobs.claim_next(state::CLAIMABLE).await.unwrap().unwrap();
        let s = jobs
            .record_failure(job.id, "connection reset", ErrorClass::Transient)
            .await
            .unwrap();
        assert_eq!(s, JobStatus::Queued);

        // Third failure exhausts the budget.
        jobs.claim_next(state::CLAIMABLE).await.unwrap().unwrap();
        let s = jobs
            .record_failure(job.id, "connection reset", ErrorClass::Transient)
            .await
            .unwrap();
        assert_eq!(s, JobStatus::Failed);

        let job = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.error_class, Some(ErrorClassTag::TerminalExhausted));
    }

    #[tokio::test]
    async fn test_terminal_input_fails_immediately() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:ee"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();

        jobs.claim_next(state::CLAIMABLE).await.unwrap().unwrap();
        let s = jobs
            .record_failure(job.id, "unsupported format", ErrorClass::TerminalInput)
            .await
            .unwrap();
        assert_eq!(s, JobStatus::Failed);
        let job = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_non_terminal() {
        let (_store, docs, jobs) = repos();
        let doc = docs
            .insert(doc_request(Uuid::new_v4(), "blake3:ff"))
            .await
            .unwrap();
        let job = jobs.create_for_document(doc.id).await.unwrap();

        assert!(jobs.cancel(job.id).await.unwrap());
        // Second cancel is a no-op.
        assert!(!jobs.cancel(job.id).await.unwrap());
        assert_eq!(
            jobs.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_find_active_for_hash_scoped_by_owner() {
        let (_store, docs, jobs) = repos();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();

        let doc = docs.insert(doc_request(owner_a, "blake3:11")).await.unwrap();
        jobs.create_for_document(doc.id).await.unwrap();

        assert!(jobs
            .find_active_for_hash(owner_a, "blake3:11")
            .await
            .unwrap()
            .is_some());
        // Same bytes under a different owner are not "in flight".
        assert!(jobs
            .find_active_for_hash(owner_b, "blake3:11")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_chunk_replace_skips_identical_set() {
        let store = MemoryStore::new();
        let chunks = MemoryChunkRepository::new(store);
        let doc_id = Uuid::new_v4();

        let set = vec![
            NewChunk {
                sequence_index: 0,
                text: "first".into(),
                content_hash: "blake3:c0".into(),
                token_count: 1,
            },
            NewChunk {
                sequence_index: 1,
                text: "second".into(),
                content_hash: "blake3:c1".into(),
                token_count: 1,
            },
        ];

        let out = chunks
            .replace_for_document(doc_id, set.clone())
            .await
            .unwrap();
        assert!(out.written);
        let first_ids: Vec<Uuid> = chunks
            .list_for_document(doc_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();

        // Identical reprocessing keeps the same rows.
        let out = chunks.replace_for_document(doc_id, set).await.unwrap();
        assert!(!out.written);
        let second_ids: Vec<Uuid> = chunks
            .list_for_document(doc_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_promotion_is_idempotent() {
        let store = MemoryStore::new();
        let chunks = MemoryChunkRepository::new(store.clone());
        let embeddings = MemoryEmbeddingRepository::new(store);
        let doc_id = Uuid::new_v4();

        chunks
            .replace_for_document(
                doc_id,
                vec![NewChunk {
                    sequence_index: 0,
                    text: "text".into(),
                    content_hash: "blake3:c0".into(),
                    token_count: 1,
                }],
            )
            .await
            .unwrap();
        let chunk_id = chunks.list_for_document(doc_id).await.unwrap()[0].id;

        embeddings
            .stage(chunk_id, doc_id, vec![0.1, 0.2])
            .await
            .unwrap();
        assert_eq!(embeddings.staged_count_for(doc_id).await.unwrap(), 1);

        assert_eq!(embeddings.promote_all_for(doc_id).await.unwrap(), 1);
        assert_eq!(embeddings.staged_count_for(doc_id).await.unwrap(), 0);
        assert_eq!(embeddings.durable_count_for(doc_id).await.unwrap(), 1);

        // Re-staging and re-promoting after a crash replay does not
        // duplicate or overwrite the durable vector.
        embeddings
            .stage(chunk_id, doc_id, vec![0.9, 0.9])
            .await
            .unwrap();
        assert_eq!(embeddings.promote_all_for(doc_id).await.unwrap(), 0);
        let record = embeddings.get(chunk_id).await.unwrap().unwrap();
        assert_eq!(record.vector, vec![0.1, 0.2]);
    }
}
