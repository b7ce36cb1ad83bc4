//! Mock parsing backend for deterministic testing.
//!
//! Responses are scripted up front so tests can exercise retry,
//! polling, and failure paths without a live service:
//!
//! ```rust,ignore
//! let backend = MockParseBackend::new()
//!     .with_result_text("extracted text")
//!     .with_status_script(vec![
//!         ExternalJobStatus::Pending,
//!         ExternalJobStatus::Pending,
//!         ExternalJobStatus::Succeeded,
//!     ]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use docflow_core::{Error, ParsedText, Result};

use crate::backend::{ExternalJobStatus, ParseBackend, SubmitReceipt};

/// One recorded call against the mock.
#[derive(Debug, Clone)]
pub struct ParseCall {
    pub operation: String,
    pub input: String,
    pub timestamp: Instant,
}

#[derive(Debug)]
struct MockState {
    reference: String,
    result_text: String,
    /// Scripted submit rejections, consumed one per `submit` call.
    submit_rejections: VecDeque<(u16, Option<u64>)>,
    /// Scripted statuses, consumed one per `fetch_status` call.
    /// When exhausted the mock keeps reporting the last entry.
    status_script: VecDeque<ExternalJobStatus>,
    last_status: ExternalJobStatus,
    latency_ms: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            reference: "mock-ref-1".to_string(),
            result_text: "Mock parsed text.".to_string(),
            submit_rejections: VecDeque::new(),
            status_script: VecDeque::new(),
            last_status: ExternalJobStatus::Succeeded,
            latency_ms: 0,
        }
    }
}

/// Scriptable [`ParseBackend`] with a call log for assertions.
#[derive(Clone)]
pub struct MockParseBackend {
    state: Arc<Mutex<MockState>>,
    call_log: Arc<Mutex<Vec<ParseCall>>>,
}

impl MockParseBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the reference returned by successful submits.
    pub fn with_reference(self, reference: impl Into<String>) -> Self {
        self.state.lock().unwrap().reference = reference.into();
        self
    }

    /// Set the text returned by `fetch_result`.
    pub fn with_result_text(self, text: impl Into<String>) -> Self {
        self.state.lock().unwrap().result_text = text.into();
        self
    }

    /// Script the statuses returned by successive `fetch_status` calls.
    pub fn with_status_script(self, script: Vec<ExternalJobStatus>) -> Self {
        self.state.lock().unwrap().status_script = script.into();
        self
    }

    /// Make the first `count` submits fail with the given HTTP status
    /// (and optional `Retry-After` seconds) before succeeding.
    pub fn with_submit_rejections(self, count: usize, status: u16, retry_after: Option<u64>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for _ in 0..count {
                state.submit_rejections.push_back((status, retry_after));
            }
        }
        self
    }

    /// Simulated latency for all operations.
    pub fn with_latency_ms(self, latency_ms: u64) -> Self {
        self.state.lock().unwrap().latency_ms = latency_ms;
        self
    }

    /// All logged calls, for assertion.
    pub fn get_calls(&self) -> Vec<ParseCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    pub fn submit_call_count(&self) -> usize {
        self.call_count("submit")
    }

    pub fn status_call_count(&self) -> usize {
        self.call_count("fetch_status")
    }

    pub fn result_call_count(&self) -> usize {
        self.call_count("fetch_result")
    }

    fn call_count(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn log_call(&self, operation: &str, input: &str) {
        self.call_log.lock().unwrap().push(ParseCall {
            operation: operation.to_string(),
            input: input.to_string(),
            timestamp: Instant::now(),
        });
    }

    async fn simulate_latency(&self) {
        let latency_ms = self.state.lock().unwrap().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }
    }
}

impl Default for MockParseBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParseBackend for MockParseBackend {
    async fn submit(
        &self,
        _data: &[u8],
        _content_type: &str,
        filename: &str,
    ) -> Result<SubmitReceipt> {
        self.log_call("submit", filename);
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if let Some((status, retry_after_secs)) = state.submit_rejections.pop_front() {
            return Err(Error::UpstreamStatus {
                status,
                message: "scripted rejection".to_string(),
                retry_after_secs,
            });
        }
        Ok(SubmitReceipt {
            external_reference: state.reference.clone(),
        })
    }

    async fn fetch_status(&self, reference: &str) -> Result<ExternalJobStatus> {
        self.log_call("fetch_status", reference);
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.status_script.pop_front() {
            state.last_status = status.clone();
            Ok(status)
        } else {
            Ok(state.last_status.clone())
        }
    }

    async fn fetch_result(&self, reference: &str) -> Result<ParsedText> {
        self.log_call("fetch_result", reference);
        self.simulate_latency().await;

        let state = self.state.lock().unwrap();
        Ok(ParsedText {
            text: state.result_text.clone(),
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_statuses_then_sticky() {
        let backend = MockParseBackend::new().with_status_script(vec![
            ExternalJobStatus::Pending,
            ExternalJobStatus::Succeeded,
        ]);

        assert_eq!(
            backend.fetch_status("r").await.unwrap(),
            ExternalJobStatus::Pending
        );
        assert_eq!(
            backend.fetch_status("r").await.unwrap(),
            ExternalJobStatus::Succeeded
        );
        // Script exhausted: the last status repeats.
        assert_eq!(
            backend.fetch_status("r").await.unwrap(),
            ExternalJobStatus::Succeeded
        );
        assert_eq!(backend.status_call_count(), 3);
    }

    #[tokio::test]
    async fn test_submit_rejections_then_success() {
        let backend = MockParseBackend::new()
            .with_reference("ext-9")
            .with_submit_rejections(2, 429, Some(1));

        for _ in 0..2 {
            let err = backend.submit(b"x", "text/plain", "a.txt").await.unwrap_err();
            assert!(matches!(err, Error::UpstreamStatus { status: 429, .. }));
        }
        let receipt = backend.submit(b"x", "text/plain", "a.txt").await.unwrap();
        assert_eq!(receipt.external_reference, "ext-9");
        assert_eq!(backend.submit_call_count(), 3);
    }
}
