//! Stage execution types shared between the pipeline and the worker.

use docflow_core::{Document, ErrorClass, Job};

/// Everything a stage needs about the job it is running.
pub struct PipelineContext {
    /// The claimed job, with its post-claim in-progress status.
    pub job: Job,
    /// The document the job ingests.
    pub document: Document,
}

impl PipelineContext {
    pub fn new(job: Job, document: Document) -> Self {
        Self { job, document }
    }
}

/// What happened when a stage ran.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage finished and the job moved to this status.
    Advanced(docflow_core::JobStatus),
    /// Submission accepted; resolution arrives later by webhook or
    /// poll, so the job stays in `awaiting_external`.
    AwaitingCallback,
    /// The job left the expected state while the stage ran (cancelled
    /// or finalized concurrently); the stage's result was discarded.
    Superseded,
    /// Transient failure; the retry budget decides whether the job
    /// rolls back for another attempt.
    Retry { message: String },
    /// Non-retryable failure.
    Failed { message: String, class: ErrorClass },
}
