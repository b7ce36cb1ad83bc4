//! Pipeline stage executors.
//!
//! A claimed job's in-progress status selects its stage:
//!
//! - `submitting`: read the raw bytes and submit them to the parsing
//!   service.
//! - `awaiting_external`: check one poll result; a webhook may resolve
//!   the same job concurrently, and whichever side wins the
//!   `awaiting_external -> parsed` compare-and-swap applies.
//! - `chunking`: run the chunker over the stored parsed text.
//! - `embedding`: embed each chunk with bounded concurrency, stage the
//!   vectors, then promote them durably and complete the job.
//!
//! Every stage finalizes with a conditional status update. A refused
//! update means the job was cancelled or resolved elsewhere while the
//! stage ran; the stage's result is discarded (`Superseded`).

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use docflow_core::{
    compute_content_hash, defaults, derive_parsed_key, ChunkRepository, DocumentRepository,
    EmbeddingRepository, Error, ErrorClass, Job, JobRepository, JobStatus, NewChunk, Result,
};
use docflow_db::{
    Chunker, ChunkerConfig, Database, MemoryChunkRepository, MemoryDocumentRepository,
    MemoryEmbeddingRepository, MemoryJobRepository, MemoryStorageBackend, MemoryStore,
    PgChunkRepository, PgDocumentRepository, PgEmbeddingRepository, PgJobRepository,
    StorageBackend, TokenChunker,
};
use docflow_parse::{ExternalJobStatus, ParserOrchestrator};

use crate::embedder::EmbeddingBackend;
use crate::handler::{PipelineContext, StageOutcome};

/// The repositories and object store the pipeline works against.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub storage: Arc<dyn StorageBackend>,
}

impl Stores {
    /// Postgres-backed stores sharing the database's pool.
    pub fn postgres(db: &Database, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            documents: Arc::new(PgDocumentRepository::new(db.pool.clone())),
            jobs: Arc::new(PgJobRepository::new(db.pool.clone())),
            chunks: Arc::new(PgChunkRepository::new(db.pool.clone())),
            embeddings: Arc::new(PgEmbeddingRepository::new(db.pool.clone())),
            storage,
        }
    }

    /// In-memory stores for tests. The awaiting-external claim hold is
    /// disabled so tests drive claims without waiting on wall clocks.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            documents: Arc::new(MemoryDocumentRepository::new(store.clone())),
            jobs: Arc::new(MemoryJobRepository::new(store.clone()).with_poll_hold_ms(0)),
            chunks: Arc::new(MemoryChunkRepository::new(store.clone())),
            embeddings: Arc::new(MemoryEmbeddingRepository::new(store)),
            storage: Arc::new(MemoryStorageBackend::new()),
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent embedding generations per document.
    pub embed_concurrency: usize,
    /// How long a job may sit in `awaiting_external` before a poll
    /// treats it as timed out.
    pub poll_budget: chrono::Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embed_concurrency: defaults::EMBED_CONCURRENCY,
            poll_budget: chrono::Duration::milliseconds(
                (defaults::POLL_INTERVAL_MS * defaults::POLL_MAX_ATTEMPTS as u64) as i64,
            ),
        }
    }
}

/// Executes pipeline stages for claimed jobs.
pub struct IngestPipeline {
    stores: Stores,
    parser: Arc<ParserOrchestrator>,
    embedder: Arc<dyn EmbeddingBackend>,
    chunker: Arc<dyn Chunker>,
    config: PipelineConfig,
}

impl IngestPipeline {
    pub fn new(
        stores: Stores,
        parser: Arc<ParserOrchestrator>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            stores,
            parser,
            embedder,
            chunker: Arc::new(TokenChunker::new(ChunkerConfig::default())),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run the stage selected by the claimed job's status.
    pub async fn execute_stage(&self, job: &Job) -> StageOutcome {
        let document = match self.stores.documents.get(job.document_id).await {
            Ok(document) => document,
            Err(err) => return self.outcome_from_error(err),
        };
        let ctx = PipelineContext::new(job.clone(), document);

        let result = match ctx.job.status {
            JobStatus::Submitting => self.submit_stage(&ctx).await,
            JobStatus::AwaitingExternal => self.await_stage(&ctx).await,
            JobStatus::Chunking => self.chunk_stage(&ctx).await,
            JobStatus::Embedding => self.embed_stage(&ctx).await,
            other => {
                debug!(job_id = %ctx.job.id, status = %other, "claimed job has no runnable stage");
                Ok(StageOutcome::Superseded)
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => self.outcome_from_error(err),
        }
    }

    fn outcome_from_error(&self, err: Error) -> StageOutcome {
        match err.classify() {
            ErrorClass::Transient => StageOutcome::Retry {
                message: err.to_string(),
            },
            class => StageOutcome::Failed {
                message: err.to_string(),
                class,
            },
        }
    }

    async fn submit_stage(&self, ctx: &PipelineContext) -> Result<StageOutcome> {
        let document = &ctx.document;
        let data = self.stores.storage.get(&document.storage_key).await?;

        match self
            .parser
            .submit_document(
                data.clone(),
                &document.content_type,
                &document.original_filename,
            )
            .await
        {
            Ok(receipt) => {
                self.stores
                    .jobs
                    .set_external_reference(ctx.job.id, &receipt.external_reference)
                    .await?;
                if self
                    .stores
                    .jobs
                    .transition(ctx.job.id, JobStatus::Submitting, JobStatus::AwaitingExternal)
                    .await?
                {
                    info!(
                        job_id = %ctx.job.id,
                        external_reference = %receipt.external_reference,
                        "document submitted, awaiting external result"
                    );
                    Ok(StageOutcome::AwaitingCallback)
                } else {
                    Ok(StageOutcome::Superseded)
                }
            }
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => {
                let class = err.classify();
                self.degrade_or_fail(ctx, &data, JobStatus::Submitting, err.to_string(), class)
                    .await
            }
        }
    }

    async fn await_stage(&self, ctx: &PipelineContext) -> Result<StageOutcome> {
        let document = &ctx.document;
        let reference = match ctx.job.external_reference.as_deref() {
            Some(reference) => reference,
            None => {
                return Ok(StageOutcome::Failed {
                    message: "awaiting external result without a service reference".to_string(),
                    class: ErrorClass::TerminalInput,
                })
            }
        };

        match self.parser.check_status(reference).await? {
            ExternalJobStatus::Pending => {
                if Utc::now() - ctx.job.created_at > self.config.poll_budget {
                    return Err(Error::Timeout(format!(
                        "parse result for job {} not ready within the poll budget",
                        ctx.job.id
                    )));
                }
                Ok(StageOutcome::AwaitingCallback)
            }
            ExternalJobStatus::Succeeded => {
                let parsed = self.parser.fetch_result(reference).await?;
                self.store_parsed_text(document, &parsed.text).await?;
                if self
                    .stores
                    .jobs
                    .transition(ctx.job.id, JobStatus::AwaitingExternal, JobStatus::Parsed)
                    .await?
                {
                    Ok(StageOutcome::Advanced(JobStatus::Parsed))
                } else {
                    Ok(StageOutcome::Superseded)
                }
            }
            ExternalJobStatus::Failed { detail } => {
                let message = if detail.is_empty() {
                    "parsing service reported failure".to_string()
                } else {
                    detail
                };
                let data = self.stores.storage.get(&document.storage_key).await?;
                self.degrade_or_fail(
                    ctx,
                    &data,
                    JobStatus::AwaitingExternal,
                    message,
                    ErrorClass::TerminalInput,
                )
                .await
            }
        }
    }

    async fn chunk_stage(&self, ctx: &PipelineContext) -> Result<StageOutcome> {
        let document = &ctx.document;
        let key = derive_parsed_key(&document.content_hash, document.owner_id)?;
        let data = self.stores.storage.get(&key).await?;
        let text = String::from_utf8_lossy(&data).into_owned();

        let new_chunks: Vec<NewChunk> = self
            .chunker
            .chunk(&text)
            .into_iter()
            .enumerate()
            .map(|(i, span)| NewChunk {
                sequence_index: i as i32,
                content_hash: compute_content_hash(span.text.as_bytes()),
                token_count: span.token_count as i32,
                text: span.text,
            })
            .collect();

        let outcome = self
            .stores
            .chunks
            .replace_for_document(document.id, new_chunks)
            .await?;
        debug!(
            job_id = %ctx.job.id,
            chunk_count = outcome.chunk_count,
            rewritten = outcome.written,
            "chunking finished"
        );

        if self
            .stores
            .jobs
            .transition(ctx.job.id, JobStatus::Chunking, JobStatus::Chunked)
            .await?
        {
            Ok(StageOutcome::Advanced(JobStatus::Chunked))
        } else {
            Ok(StageOutcome::Superseded)
        }
    }

    async fn embed_stage(&self, ctx: &PipelineContext) -> Result<StageOutcome> {
        let document = &ctx.document;
        let chunks = self.stores.chunks.list_for_document(document.id).await?;
        let chunk_count = chunks.len();

        // Completion order does not matter: staging is keyed by
        // chunk_id, so vectors land on the right chunk regardless.
        let results: Vec<Result<()>> = stream::iter(chunks)
            .map(|chunk| {
                let embedder = self.embedder.clone();
                let embeddings = self.stores.embeddings.clone();
                let document_id = document.id;
                async move {
                    let vector = embedder.embed(&chunk.text).await?;
                    embeddings.stage(chunk.id, document_id, vector).await
                }
            })
            .buffer_unordered(self.config.embed_concurrency)
            .collect()
            .await;
        for result in results {
            result?;
        }

        let promoted = self.stores.embeddings.promote_all_for(document.id).await?;
        debug!(
            job_id = %ctx.job.id,
            chunk_count,
            promoted,
            "embeddings promoted"
        );

        if self
            .stores
            .jobs
            .transition(ctx.job.id, JobStatus::Embedding, JobStatus::Complete)
            .await?
        {
            info!(job_id = %ctx.job.id, document_id = %document.id, "ingestion complete");
            Ok(StageOutcome::Advanced(JobStatus::Complete))
        } else {
            Ok(StageOutcome::Superseded)
        }
    }

    /// On a non-retryable external failure, extract locally when
    /// fallback is enabled; otherwise fail the job with its class.
    async fn degrade_or_fail(
        &self,
        ctx: &PipelineContext,
        data: &[u8],
        from: JobStatus,
        message: String,
        class: ErrorClass,
    ) -> Result<StageOutcome> {
        let document = &ctx.document;
        match self.parser.try_fallback(data, &document.content_type) {
            Some(parsed) => {
                self.store_parsed_text(document, &parsed.text).await?;
                // Flag degraded only after winning the finalization CAS;
                // a concurrent resolution that beat us may have clean text.
                if self
                    .stores
                    .jobs
                    .transition(ctx.job.id, from, JobStatus::Parsed)
                    .await?
                {
                    self.stores.jobs.set_degraded(ctx.job.id).await?;
                    warn!(
                        job_id = %ctx.job.id,
                        reason = %message,
                        "external parse failed, continuing with degraded local extraction"
                    );
                    Ok(StageOutcome::Advanced(JobStatus::Parsed))
                } else {
                    Ok(StageOutcome::Superseded)
                }
            }
            None => Ok(StageOutcome::Failed { message, class }),
        }
    }

    /// Persist parsed text under its derived key. A concurrent
    /// resolution may have stored a result already; the existing text
    /// wins and this write is dropped.
    async fn store_parsed_text(&self, document: &docflow_core::Document, text: &str) -> Result<()> {
        let key = derive_parsed_key(&document.content_hash, document.owner_id)?;
        match self.stores.storage.put(&key, text.as_bytes()).await {
            Ok(()) => Ok(()),
            Err(Error::Conflict(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    use docflow_core::{derive_key, state, CreateDocumentRequest, Document, ErrorClassTag};
    use docflow_parse::mock::MockParseBackend;
    use docflow_parse::{OrchestratorConfig, QueueConfig, RequestQueue, RetryPolicy};

    use crate::embedder::HashEmbedder;

    fn parser(backend: MockParseBackend, fallback_enabled: bool) -> Arc<ParserOrchestrator> {
        let queue = Arc::new(RequestQueue::new(QueueConfig {
            max_concurrent_requests: 4,
            min_dispatch_interval: Duration::ZERO,
            max_queue_depth: 16,
            retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 3),
        }));
        Arc::new(ParserOrchestrator::new(
            Arc::new(backend),
            queue,
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                poll_max_attempts: 5,
                fallback_enabled,
            },
        ))
    }

    fn pipeline(backend: MockParseBackend, fallback_enabled: bool) -> IngestPipeline {
        let stores = Stores::in_memory(MemoryStore::new());
        IngestPipeline::new(
            stores,
            parser(backend, fallback_enabled),
            Arc::new(HashEmbedder::new(32)),
        )
    }

    async fn seed(pipeline: &IngestPipeline, body: &[u8]) -> (Document, Job) {
        let stores = pipeline.stores();
        let owner_id = Uuid::new_v4();
        let content_hash = compute_content_hash(body);
        let storage_key = derive_key(&content_hash, "txt", owner_id).unwrap();
        stores.storage.put(&storage_key, body).await.unwrap();
        let document = stores
            .documents
            .insert(CreateDocumentRequest {
                owner_id,
                content_hash,
                storage_key,
                original_filename: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                size_bytes: body.len() as i64,
            })
            .await
            .unwrap();
        let job = stores.jobs.create_for_document(document.id).await.unwrap();
        (document, job)
    }

    /// Claim and execute stages the way the worker does, applying
    /// failure outcomes through the retry budget.
    async fn drive(pipeline: &IngestPipeline) {
        let jobs = pipeline.stores().jobs.clone();
        for _ in 0..32 {
            let Some(job) = jobs.claim_next(state::CLAIMABLE).await.unwrap() else {
                return;
            };
            match pipeline.execute_stage(&job).await {
                StageOutcome::Retry { message } => {
                    jobs.record_failure(job.id, &message, ErrorClass::Transient)
                        .await
                        .unwrap();
                }
                StageOutcome::Failed { message, class } => {
                    jobs.record_failure(job.id, &message, class).await.unwrap();
                }
                _ => {}
            }
        }
        panic!("pipeline did not settle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_runs_to_completion() {
        let backend = MockParseBackend::new().with_result_text("One sentence. Another sentence.");
        let pipeline = pipeline(backend, true);
        let (document, job) = seed(&pipeline, b"raw upload bytes").await;

        drive(&pipeline).await;

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(!job.degraded);
        assert!(job.external_reference.is_some());

        let chunks = pipeline
            .stores()
            .chunks
            .list_for_document(document.id)
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        let durable = pipeline
            .stores()
            .embeddings
            .durable_count_for(document.id)
            .await
            .unwrap();
        assert_eq!(durable, chunks.len() as i64);
        let staged = pipeline
            .stores()
            .embeddings
            .staged_count_for(document.id)
            .await
            .unwrap();
        assert_eq!(staged, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_falls_back_to_degraded() {
        // Every submit is rejected as unsupported input.
        let backend = MockParseBackend::new().with_submit_rejections(10, 422, None);
        let pipeline = pipeline(backend, true);
        let (document, job) = seed(&pipeline, b"Plain readable body.").await;

        drive(&pipeline).await;

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.degraded);
        assert_eq!(job.error_class, Some(ErrorClassTag::DegradedFallback));

        // Chunks come from the local extraction of the original bytes.
        let chunks = pipeline
            .stores()
            .chunks
            .list_for_document(document.id)
            .await
            .unwrap();
        assert!(chunks.iter().any(|c| c.text.contains("Plain readable body")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_submit_failures_consume_an_attempt_then_recover() {
        // Five 503s: the queue retries four times within one stage run,
        // the job rolls back to queued, and the next claim succeeds.
        let backend = MockParseBackend::new().with_submit_rejections(5, 503, None);
        let pipeline = pipeline(backend, true);
        let (_document, job) = seed(&pipeline, b"body").await;

        drive(&pipeline).await;

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.attempt_count, 1);
        assert!(!job.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_failure_without_fallback_fails_job() {
        let backend = MockParseBackend::new().with_status_script(vec![
            ExternalJobStatus::Failed {
                detail: "encrypted document".to_string(),
            },
        ]);
        let pipeline = pipeline(backend, false);
        let (_document, job) = seed(&pipeline, b"body").await;

        drive(&pipeline).await;

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_class, Some(ErrorClassTag::TerminalInput));
        assert!(job
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("encrypted document")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_discards_in_flight_stage() {
        let backend = MockParseBackend::new();
        let pipeline = pipeline(backend, true);
        let (_document, job) = seed(&pipeline, b"body").await;

        let claimed = pipeline
            .stores()
            .jobs
            .claim_next(state::CLAIMABLE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, JobStatus::Submitting);

        // Cancel while the stage is notionally in flight.
        assert!(pipeline.stores().jobs.cancel(job.id).await.unwrap());

        let outcome = pipeline.execute_stage(&claimed).await;
        assert!(matches!(outcome, StageOutcome::Superseded));

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_external_parse_exhausts_attempts() {
        // The service never finishes and the poll budget is already
        // spent, so every awaiting claim times out until the retry
        // budget is gone.
        let backend =
            MockParseBackend::new().with_status_script(vec![ExternalJobStatus::Pending]);
        let pipeline = pipeline(backend, true).with_config(PipelineConfig {
            embed_concurrency: 2,
            poll_budget: chrono::Duration::milliseconds(-1),
        });
        let (_document, job) = seed(&pipeline, b"body").await;

        drive(&pipeline).await;

        let job = pipeline.stores().jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_class, Some(ErrorClassTag::TerminalExhausted));
        assert_eq!(job.attempt_count, job.max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reingested_document_keeps_identical_chunk_ids() {
        let backend = MockParseBackend::new().with_result_text("Stable text body.");
        let pipeline = pipeline(backend, true);
        let (document, job) = seed(&pipeline, b"bytes").await;

        drive(&pipeline).await;
        let before = pipeline
            .stores()
            .chunks
            .list_for_document(document.id)
            .await
            .unwrap();

        // Re-run chunking directly with the same parsed text.
        let rerun = Job {
            status: JobStatus::Chunking,
            ..job.clone()
        };
        let outcome = pipeline.execute_stage(&rerun).await;
        // The job is complete, so the chunking CAS must refuse.
        assert!(matches!(outcome, StageOutcome::Superseded));

        let after = pipeline
            .stores()
            .chunks
            .list_for_document(document.id)
            .await
            .unwrap();
        let before_ids: Vec<Uuid> = before.iter().map(|c| c.id).collect();
        let after_ids: Vec<Uuid> = after.iter().map(|c| c.id).collect();
        assert_eq!(before_ids, after_ids);
    }
}
