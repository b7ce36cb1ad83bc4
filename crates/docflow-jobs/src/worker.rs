//! The ingestion worker: claims jobs and runs their stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use docflow_core::{defaults, state, Error, ErrorClass, Job, JobStatus, Result};

use crate::handler::StageOutcome;
use crate::pipeline::IngestPipeline;

/// Configuration for the ingest worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrently executing stages.
    pub max_concurrent_jobs: usize,
    /// Hard per-stage timeout in seconds.
    pub stage_timeout_secs: u64,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            stage_timeout_secs: defaults::STAGE_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INGEST_WORKER_ENABLED` | `true` | Enable/disable processing |
    /// | `INGEST_MAX_CONCURRENT` | `4` | Max concurrent stages |
    /// | `INGEST_POLL_INTERVAL_MS` | `500` | Polling interval when idle |
    /// | `INGEST_STAGE_TIMEOUT_SECS` | `300` | Per-stage timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("INGEST_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("INGEST_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("INGEST_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        let stage_timeout_secs = std::env::var("INGEST_STAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::STAGE_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            stage_timeout_secs,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_stage_timeout(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the ingest worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A stage started running for a claimed job.
    JobStarted {
        job_id: Uuid,
        document_id: Uuid,
        stage: JobStatus,
    },
    /// A stage finished and the job moved forward.
    JobAdvanced {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    /// The job reached `complete`.
    JobCompleted { job_id: Uuid, document_id: Uuid },
    /// A transient failure rolled the job back for another attempt.
    JobRetried {
        job_id: Uuid,
        rolled_back_to: JobStatus,
        error: String,
    },
    /// The job failed terminally.
    JobFailed {
        job_id: Uuid,
        class: ErrorClass,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that claims ingest jobs and executes pipeline stages.
pub struct IngestWorker {
    pipeline: Arc<IngestPipeline>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl IngestWorker {
    pub fn new(pipeline: Arc<IngestPipeline>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            pipeline,
            config,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Get a sender handle for worker events (for fan-out surfaces).
    pub fn event_sender(&self) -> broadcast::Sender<WorkerEvent> {
        self.event_tx.clone()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent stage execution.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and runs their
    /// stages concurrently. Sleeps only when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("ingest worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            stage_timeout_secs = self.config.stage_timeout_secs,
            "ingest worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("ingest worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent_jobs {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let executor = WorkerRef {
                            pipeline: self.pipeline.clone(),
                            event_tx: self.event_tx.clone(),
                            stage_timeout: Duration::from_secs(self.config.stage_timeout_secs),
                        };
                        tasks.spawn(async move {
                            executor.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("ingest worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "running concurrent stage batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "stage task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("ingest worker stopped");
    }

    async fn claim_job(&self) -> Option<Job> {
        match self
            .pipeline
            .stores()
            .jobs
            .claim_next(state::CLAIMABLE)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(error = ?e, "failed to claim job");
                None
            }
        }
    }
}

/// Reference bundle for executing one claimed job in a spawned task.
struct WorkerRef {
    pipeline: Arc<IngestPipeline>,
    event_tx: broadcast::Sender<WorkerEvent>,
    stage_timeout: Duration,
}

impl WorkerRef {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let stage = job.status;

        debug!(%job_id, %stage, "running pipeline stage");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            document_id: job.document_id,
            stage,
        });

        // The timeout bounds every stage so a hung external call can
        // never strand a claimed job.
        let outcome =
            match tokio::time::timeout(self.stage_timeout, self.pipeline.execute_stage(&job)).await
            {
                Ok(outcome) => outcome,
                Err(_) => StageOutcome::Retry {
                    message: format!(
                        "stage {} exceeded timeout of {}s",
                        stage,
                        self.stage_timeout.as_secs()
                    ),
                },
            };

        match outcome {
            StageOutcome::Advanced(to) => {
                info!(
                    %job_id,
                    from = %stage,
                    %to,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "stage advanced"
                );
                let _ = self.event_tx.send(WorkerEvent::JobAdvanced {
                    job_id,
                    from: stage,
                    to,
                });
                if to == JobStatus::Complete {
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        document_id: job.document_id,
                    });
                }
            }
            StageOutcome::AwaitingCallback => {
                debug!(%job_id, "awaiting external resolution");
            }
            StageOutcome::Superseded => {
                debug!(%job_id, "stage result discarded, job resolved elsewhere");
            }
            StageOutcome::Retry { message } => {
                self.record(job_id, &message, ErrorClass::Transient).await;
            }
            StageOutcome::Failed { message, class } => {
                self.record(job_id, &message, class).await;
            }
        }
    }

    async fn record(&self, job_id: Uuid, message: &str, class: ErrorClass) {
        match self
            .pipeline
            .stores()
            .jobs
            .record_failure(job_id, message, class)
            .await
        {
            Ok(status) if status.is_terminal() => {
                warn!(%job_id, %status, error = %message, "job failed terminally");
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    class,
                    error: message.to_string(),
                });
            }
            Ok(status) => {
                warn!(%job_id, rolled_back_to = %status, error = %message, "job rolled back for retry");
                let _ = self.event_tx.send(WorkerEvent::JobRetried {
                    job_id,
                    rolled_back_to: status,
                    error: message.to_string(),
                });
            }
            Err(e) => {
                error!(%job_id, error = ?e, "failed to record job failure");
            }
        }
    }
}
