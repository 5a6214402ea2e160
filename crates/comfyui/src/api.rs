//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval and artifact download
//! using [`reqwest`]. [`GenerationBackend`] is the seam the job controller
//! talks through, so tests can stand in a scripted backend.

use async_trait::async_trait;
use genstudio_core::WorkflowGraph;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by `POST /api/prompt` after the workflow is queued.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    #[serde(default)]
    pub number: Option<i64>,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a WorkflowGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Operations the job controller needs from a generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Queue a workflow, tagging it with the progress session if known.
    async fn submit(
        &self,
        workflow: &WorkflowGraph,
        client_id: Option<&str>,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Fetch the raw history record for a job.
    async fn history(&self, job_id: &str) -> Result<serde_json::Value, ComfyUIApiError>;

    /// Download the bytes behind an artifact URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError>;
}

impl ComfyUIApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.api_url.clone())
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /api/prompt` with body `{"prompt": <graph>}`, plus
    /// `client_id` when given so ComfyUI addresses per-prompt events to
    /// that WebSocket session.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: Option<&str>,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = SubmitRequest {
            prompt: workflow,
            client_id,
        };

        let response = self
            .client
            .post(format!("{}/api/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends `GET /api/history/{prompt_id}`. The record is keyed by the
    /// prompt id and is empty (`{}`) until the prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/api/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download a file by absolute URL.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise turn it
    /// into [`ComfyUIApiError::ApiError`] carrying the status and body.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &WorkflowGraph,
        client_id: Option<&str>,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn history(&self, job_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.get_history(job_id).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        self.download_bytes(url).await
    }
}
