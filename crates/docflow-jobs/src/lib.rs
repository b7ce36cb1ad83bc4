//! # docflow-jobs
//!
//! The ingestion pipeline worker for docflow.
//!
//! This crate provides:
//! - Compare-and-swap job claiming with concurrent stage execution
//! - Stage executors for submission, external-result resolution,
//!   chunking, and embedding
//! - Progress notifications via broadcast channels
//! - Per-stage timeouts and retry-budget accounting
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docflow_db::{Database, FilesystemBackend};
//! use docflow_jobs::{HashEmbedder, IngestPipeline, IngestWorker, Stores, WorkerConfig};
//! use docflow_parse::{ParseClient, ParserOrchestrator, OrchestratorConfig, RequestQueue, QueueConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let storage = Arc::new(FilesystemBackend::new("/var/lib/docflow"));
//! let queue = Arc::new(RequestQueue::new(QueueConfig::default()));
//! let parser = Arc::new(ParserOrchestrator::new(
//!     Arc::new(ParseClient::from_env()?),
//!     queue,
//!     OrchestratorConfig::from_env(),
//! ));
//!
//! let pipeline = Arc::new(IngestPipeline::new(
//!     Stores::postgres(&db, storage),
//!     parser,
//!     Arc::new(HashEmbedder::default()),
//! ));
//!
//! let handle = IngestWorker::new(pipeline, WorkerConfig::from_env()).start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod embedder;
pub mod handler;
pub mod pipeline;
pub mod worker;

pub use embedder::{EmbeddingBackend, HashEmbedder};
pub use handler::{PipelineContext, StageOutcome};
pub use pipeline::{IngestPipeline, PipelineConfig, Stores};
pub use worker::{IngestWorker, WorkerConfig, WorkerEvent, WorkerHandle};
