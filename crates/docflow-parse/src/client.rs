//! HTTP client for the external parsing service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use docflow_core::{defaults, Error, ParsedText, Result};

use crate::backend::{ExternalJobStatus, ParseBackend, SubmitReceipt};

/// Default parsing-service endpoint.
pub const DEFAULT_PARSE_URL: &str = defaults::PARSE_BASE_URL;

/// Per-request timeout (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = defaults::PARSE_REQUEST_TIMEOUT_SECS;

/// Connection settings for [`ParseClient`].
#[derive(Debug, Clone)]
pub struct ParseClientConfig {
    pub base_url: String,
    /// Bearer token; omitted when the service is unauthenticated.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ParseClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PARSE_URL.to_string(),
            api_key: None,
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Reqwest-backed [`ParseBackend`] implementation.
pub struct ParseClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    reference: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResultResponse {
    text: String,
}

impl ParseClient {
    /// Create a client with custom configuration.
    pub fn with_config(config: ParseClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(
            subsystem = "parse",
            component = "client",
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            authenticated = config.api_key.is_some(),
            "initializing parse client"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    /// Create a client from environment variables.
    ///
    /// `PARSE_SERVICE_URL`, `PARSE_SERVICE_API_KEY`, and
    /// `PARSE_REQUEST_TIMEOUT_SECS` override the defaults.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("PARSE_SERVICE_URL").unwrap_or_else(|_| DEFAULT_PARSE_URL.to_string());
        let api_key = std::env::var("PARSE_SERVICE_API_KEY").ok();
        let timeout_secs = std::env::var("PARSE_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(REQUEST_TIMEOUT_SECS);

        Self::with_config(ParseClientConfig {
            base_url,
            api_key,
            timeout_secs,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Turn a non-success response into [`Error::UpstreamStatus`],
    /// surfacing `Retry-After` so the queue can honor it.
    async fn status_error(response: Response) -> Error {
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = response.text().await.unwrap_or_default();

        warn!(
            subsystem = "parse",
            component = "client",
            status,
            retry_after_secs,
            "parsing service returned error status"
        );

        Error::UpstreamStatus {
            status,
            message,
            retry_after_secs,
        }
    }
}

#[async_trait]
impl ParseBackend for ParseClient {
    #[instrument(skip(self, data), fields(subsystem = "parse", component = "client", op = "submit", size = data.len(), content_type))]
    async fn submit(
        &self,
        data: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<SubmitReceipt> {
        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .authorize(self.client.post(format!("{}/v1/parse", self.base_url)))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: SubmitResponse = response.json().await?;
        debug!(external_reference = %body.reference, "document accepted by parsing service");
        Ok(SubmitReceipt {
            external_reference: body.reference,
        })
    }

    #[instrument(skip(self), fields(subsystem = "parse", component = "client", op = "fetch_status", reference))]
    async fn fetch_status(&self, reference: &str) -> Result<ExternalJobStatus> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/parse/{}", self.base_url, reference)),
            )
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "parse reference {} unknown to service",
                reference
            )));
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: StatusResponse = response.json().await?;
        match body.status.as_str() {
            "pending" | "processing" => Ok(ExternalJobStatus::Pending),
            "succeeded" => Ok(ExternalJobStatus::Succeeded),
            "failed" => Ok(ExternalJobStatus::Failed {
                detail: body.error.unwrap_or_default(),
            }),
            other => Err(Error::Parse(format!(
                "unrecognized service status: {}",
                other
            ))),
        }
    }

    #[instrument(skip(self), fields(subsystem = "parse", component = "client", op = "fetch_result", reference))]
    async fn fetch_result(&self, reference: &str) -> Result<ParsedText> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/parse/{}/result", self.base_url, reference)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: ResultResponse = response.json().await?;
        Ok(ParsedText {
            text: body.text,
            degraded: false,
        })
    }
}
