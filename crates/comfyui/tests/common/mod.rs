#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genstudio_comfyui::api::{ComfyUIApiError, GenerationBackend, SubmitResponse};
use genstudio_comfyui::controller::{ControllerConfig, JobController};
use genstudio_comfyui::progress::ProgressState;
use genstudio_core::WorkflowGraph;
use serde_json::json;
use tracing_subscriber::EnvFilter;

pub const OUTPUTS_URL: &str = "http://outputs.test/files";

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Controller settings with short timeouts so failure paths finish fast.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        outputs_base_url: OUTPUTS_URL.to_string(),
        submit_timeout: Duration::from_millis(200),
        fetch_timeout: Duration::from_millis(200),
    }
}

pub fn controller(
    backend: &Arc<MockBackend>,
    state: ProgressState,
) -> JobController<MockBackend> {
    JobController::new(Arc::clone(backend), state, test_config())
}

/// A history record holding one finished image for `job_id`.
pub fn image_history(job_id: &str, filename: &str) -> serde_json::Value {
    let mut record = serde_json::Map::new();
    record.insert(
        job_id.to_string(),
        json!({ "outputs": { "9": { "images": [
            { "filename": filename, "subfolder": "", "type": "output" }
        ] } } }),
    );
    serde_json::Value::Object(record)
}

/// Scripted response of a mock backend call.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Status(u16),
    Hang,
}

impl<T> Reply<T> {
    async fn resolve(self) -> Result<T, ComfyUIApiError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Status(status) => Err(ComfyUIApiError::ApiError {
                status,
                body: "mock failure".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// In-memory [`GenerationBackend`] that records every call.
///
/// History replies are consumed in order; once exhausted every lookup
/// returns an empty record (`{}`).
pub struct MockBackend {
    submit_reply: Mutex<Reply<String>>,
    history_replies: Mutex<VecDeque<Reply<serde_json::Value>>>,
    download_reply: Mutex<Reply<Vec<u8>>>,
    submits: Mutex<Vec<(WorkflowGraph, Option<String>)>>,
    history_calls: Mutex<Vec<String>>,
    downloads: AtomicUsize,
}

impl MockBackend {
    pub fn accepting(job_id: &str) -> Self {
        Self {
            submit_reply: Mutex::new(Reply::Ok(job_id.to_string())),
            history_replies: Mutex::new(VecDeque::new()),
            download_reply: Mutex::new(Reply::Ok(b"artifact-bytes".to_vec())),
            submits: Mutex::new(Vec::new()),
            history_calls: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_submit(self, reply: Reply<String>) -> Self {
        *self.submit_reply.lock().unwrap() = reply;
        self
    }

    pub fn with_history(self, reply: Reply<serde_json::Value>) -> Self {
        self.history_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_download(self, reply: Reply<Vec<u8>>) -> Self {
        *self.download_reply.lock().unwrap() = reply;
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    pub fn submitted(&self) -> Vec<(WorkflowGraph, Option<String>)> {
        self.submits.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn history_count(&self) -> usize {
        self.history_calls.lock().unwrap().len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Yield until at least `n` history lookups have been made.
    pub async fn wait_for_history_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.history_count() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("history lookup was never made");
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn submit(
        &self,
        workflow: &WorkflowGraph,
        client_id: Option<&str>,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submits
            .lock()
            .unwrap()
            .push((workflow.clone(), client_id.map(str::to_string)));
        let reply = self.submit_reply.lock().unwrap().clone();
        let prompt_id = reply.resolve().await?;
        Ok(SubmitResponse {
            prompt_id,
            number: Some(1),
        })
    }

    async fn history(&self, job_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.history_calls.lock().unwrap().push(job_id.to_string());
        let reply = self
            .history_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Ok(json!({})));
        reply.resolve().await
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let reply = self.download_reply.lock().unwrap().clone();
        reply.resolve().await
    }
}
