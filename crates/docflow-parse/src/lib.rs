//! External parsing-service integration for docflow.
//!
//! Documents are parsed by an external HTTP service. This crate owns
//! everything between the pipeline and that service:
//!
//! - [`queue::RequestQueue`]: concurrency bound, dispatch spacing, and
//!   bounded admission with retry/backoff.
//! - [`client::ParseClient`]: the reqwest wire client.
//! - [`orchestrator::ParserOrchestrator`]: submit, poll, and degraded
//!   local fallback.
//! - [`mock::MockParseBackend`]: scriptable backend for tests (behind
//!   the `mock` feature).

pub mod backend;
pub mod client;
pub mod fallback;
pub mod orchestrator;
pub mod queue;
pub mod retry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{ExternalJobStatus, ParseBackend, SubmitReceipt};
pub use client::{ParseClient, ParseClientConfig};
pub use fallback::extract_plain_text;
pub use orchestrator::{OrchestratorConfig, ParserOrchestrator};
pub use queue::{QueueConfig, RequestQueue};
pub use retry::RetryPolicy;
