//! Backend abstraction over the external parsing service.
//!
//! The orchestrator only talks to this trait, so tests swap the HTTP
//! client for [`crate::mock::MockParseBackend`] without touching the
//! orchestration logic.

use async_trait::async_trait;

use docflow_core::{ParsedText, Result};

/// Acknowledgement returned when a document is accepted by the
/// external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Opaque reference the service uses for later status lookups.
    pub external_reference: String,
}

/// Status of a submitted parse operation as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalJobStatus {
    /// Still being processed.
    Pending,
    /// Finished; the result can be fetched.
    Succeeded,
    /// The service gave up on this document.
    Failed {
        /// Service-provided failure detail (may be empty).
        detail: String,
    },
}

/// External parsing-service operations.
#[async_trait]
pub trait ParseBackend: Send + Sync {
    /// Submit raw document bytes for parsing.
    async fn submit(
        &self,
        data: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<SubmitReceipt>;

    /// Fetch the current status of a previously submitted document.
    async fn fetch_status(&self, reference: &str) -> Result<ExternalJobStatus>;

    /// Fetch the extracted text for a succeeded parse.
    async fn fetch_result(&self, reference: &str) -> Result<ParsedText>;
}
