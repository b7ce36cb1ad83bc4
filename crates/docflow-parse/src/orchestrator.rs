//! Parser orchestration: submission, polling, and degraded fallback.
//!
//! All service traffic goes through the shared [`RequestQueue`], so
//! submissions and polls together respect the concurrency bound and
//! dispatch spacing. The orchestrator never touches job state; callers
//! finalize results with a compare-and-swap in the job repository, so
//! a webhook and a poll racing on the same job cannot double-apply.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use docflow_core::{defaults, Error, ParsedText, Result};

use crate::backend::{ExternalJobStatus, ParseBackend, SubmitReceipt};
use crate::fallback::extract_plain_text;
use crate::queue::RequestQueue;

/// Polling and fallback behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    /// When true, non-retryable external failures fall back to local
    /// extraction instead of failing the document outright.
    pub fallback_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            poll_max_attempts: defaults::POLL_MAX_ATTEMPTS,
            fallback_enabled: true,
        }
    }
}

impl OrchestratorConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// `PARSE_POLL_INTERVAL_MS`, `PARSE_POLL_MAX_ATTEMPTS`, and
    /// `PARSE_FALLBACK_ENABLED` are honored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: std::env::var("PARSE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            poll_max_attempts: std::env::var("PARSE_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_max_attempts),
            fallback_enabled: std::env::var("PARSE_FALLBACK_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.fallback_enabled),
        }
    }
}

/// Drives a document through the external parsing service.
pub struct ParserOrchestrator {
    backend: Arc<dyn ParseBackend>,
    queue: Arc<RequestQueue>,
    config: OrchestratorConfig,
}

impl ParserOrchestrator {
    pub fn new(
        backend: Arc<dyn ParseBackend>,
        queue: Arc<RequestQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit document bytes through the queue.
    #[instrument(skip(self, data), fields(subsystem = "parse", component = "orchestrator", op = "submit_document", size = data.len()))]
    pub async fn submit_document(
        &self,
        data: Vec<u8>,
        content_type: &str,
        filename: &str,
    ) -> Result<SubmitReceipt> {
        let backend = self.backend.clone();
        let data = Arc::new(data);
        let content_type = content_type.to_string();
        let filename = filename.to_string();

        let receipt = self
            .queue
            .submit("submit_document", move || {
                let backend = backend.clone();
                let data = data.clone();
                let content_type = content_type.clone();
                let filename = filename.clone();
                async move { backend.submit(&data, &content_type, &filename).await }
            })
            .await?;

        info!(
            external_reference = %receipt.external_reference,
            "document submitted to parsing service"
        );
        Ok(receipt)
    }

    /// Fetch the current status once, through the queue.
    pub async fn check_status(&self, reference: &str) -> Result<ExternalJobStatus> {
        let backend = self.backend.clone();
        let reference = reference.to_string();
        self.queue
            .submit("fetch_status", move || {
                let backend = backend.clone();
                let reference = reference.clone();
                async move { backend.fetch_status(&reference).await }
            })
            .await
    }

    /// Fetch the extracted text for a succeeded parse, through the
    /// queue.
    pub async fn fetch_result(&self, reference: &str) -> Result<ParsedText> {
        let backend = self.backend.clone();
        let reference = reference.to_string();
        self.queue
            .submit("fetch_result", move || {
                let backend = backend.clone();
                let reference = reference.clone();
                async move { backend.fetch_result(&reference).await }
            })
            .await
    }

    /// Poll until the service reports a terminal state, then fetch the
    /// result. Exceeding the attempt cap yields [`Error::Timeout`]; a
    /// reported failure yields [`Error::Parse`].
    #[instrument(skip(self), fields(subsystem = "parse", component = "orchestrator", op = "await_result", reference))]
    pub async fn await_result(&self, reference: &str) -> Result<ParsedText> {
        for attempt in 0..self.config.poll_max_attempts {
            match self.check_status(reference).await? {
                ExternalJobStatus::Pending => {
                    debug!(attempt, "parse still pending");
                    sleep(self.config.poll_interval).await;
                }
                ExternalJobStatus::Succeeded => {
                    return self.fetch_result(reference).await;
                }
                ExternalJobStatus::Failed { detail } => {
                    warn!(detail = %detail, "parsing service reported failure");
                    return Err(Error::Parse(if detail.is_empty() {
                        "parsing service reported failure".to_string()
                    } else {
                        detail
                    }));
                }
            }
        }
        Err(Error::Timeout(format!(
            "parse result for {} not ready after {} polls",
            reference, self.config.poll_max_attempts
        )))
    }

    /// Degraded local extraction, if enabled.
    pub fn try_fallback(&self, data: &[u8], content_type: &str) -> Option<ParsedText> {
        if !self.config.fallback_enabled {
            return None;
        }
        Some(extract_plain_text(data, content_type))
    }
}
