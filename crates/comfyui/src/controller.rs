//! Job controller: drives one generation request end to end.
//!
//! ```text
//! Idle -> Submitting -> AwaitingCompletion -> Fetching -> Done
//!              |                                  |
//!              +-------------> Failed <-----------+
//! ```
//!
//! After submission the controller watches the shared queue depth and
//! treats `remaining == 0` as "my job finished": either the value seen
//! when the job enters `AwaitingCompletion`, or a later change to zero.
//! The queue is backend-wide, so this only holds with a single job in
//! flight. A history lookup that finds no artifact leaves the controller
//! in `Fetching` until the next queue-empty transition.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use genstudio_core::templates;
use genstudio_core::types::JobId;
use genstudio_core::{GenerationParams, Modality, WorkflowError, WorkflowGraph};
use serde::Serialize;
use tokio::sync::watch;

use crate::api::{ComfyUIApiError, GenerationBackend};
use crate::config::ClientConfig;
use crate::history::{self, FetchOutcome, GeneratedArtifact};
use crate::progress::{ProgressState, QueueStatus};

/// Observable state of a [`JobController`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Submitting,
    AwaitingCompletion { job_id: JobId },
    Fetching { job_id: JobId },
    Done { artifact: GeneratedArtifact },
    Failed { job_id: Option<JobId>, reason: String },
}

impl JobState {
    /// Whether a submitted job is still waiting for its artifact.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::AwaitingCompletion { .. } | Self::Fetching { .. })
    }
}

/// Why a backend round trip did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum RequestFailure {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors returned by [`JobController`] operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Rejected before anything was sent; the controller state is unchanged.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] WorkflowError),

    #[error("Submission failed: {0}")]
    Submission(#[source] RequestFailure),

    #[error("Result fetch failed: {0}")]
    Fetch(#[source] RequestFailure),

    /// The progress channel went away while waiting for completion.
    #[error("Progress channel closed")]
    ChannelClosed,

    #[error("No job is awaiting completion")]
    NoPendingJob,

    #[error("No artifact is available yet")]
    NoArtifact,

    #[error("Artifact download failed: {0}")]
    Download(#[source] RequestFailure),

    #[error("Failed to save artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings the controller needs from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub outputs_base_url: String,
    pub submit_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl From<&ClientConfig> for ControllerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            outputs_base_url: config.outputs_base_url.clone(),
            submit_timeout: config.submit_timeout,
            fetch_timeout: config.fetch_timeout,
        }
    }
}

struct PendingJob {
    job_id: JobId,
    modality: Modality,
    /// Subscribed before submission so no queue change after it is missed.
    queue: watch::Receiver<Option<QueueStatus>>,
    /// The queue already read empty when the job was accepted. Consumed by
    /// the first fetch.
    drained_at_submit: bool,
}

/// Orchestrates a single generation request.
///
/// Only one submission is tracked at a time; starting a new one discards
/// the previous job id and artifact.
pub struct JobController<B> {
    backend: Arc<B>,
    progress: ProgressState,
    config: ControllerConfig,
    state_tx: watch::Sender<JobState>,
    pending: Option<PendingJob>,
    artifact: Option<GeneratedArtifact>,
}

impl<B: GenerationBackend> JobController<B> {
    pub fn new(backend: Arc<B>, progress: ProgressState, config: ControllerConfig) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            backend,
            progress,
            config,
            state_tx,
            pending: None,
            artifact: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.state_tx.subscribe()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.job_id.as_str())
    }

    pub fn artifact(&self) -> Option<&GeneratedArtifact> {
        self.artifact.as_ref()
    }

    /// Forget the current job and artifact and return to `Idle`.
    pub fn clear(&mut self) {
        self.pending = None;
        self.artifact = None;
        self.set_state(JobState::Idle);
    }

    /// Build the workflow and submit it, returning the backend job id.
    ///
    /// Invalid input is rejected before any state change or network call.
    pub async fn submit(
        &mut self,
        modality: Modality,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<JobId, JobError> {
        let workflow = templates::build(modality, prompt, params)?;
        self.clear();
        self.submit_workflow(modality, &workflow).await
    }

    /// Wait for the pending job to finish and resolve its artifact.
    pub async fn await_artifact(&mut self) -> Result<GeneratedArtifact, JobError> {
        if let (JobState::Done { .. }, Some(artifact)) = (self.state(), &self.artifact) {
            return Ok(artifact.clone());
        }
        if !self.state().is_pending() {
            return Err(JobError::NoPendingJob);
        }
        let Some(pending) = self.pending.as_mut() else {
            return Err(JobError::NoPendingJob);
        };
        let job_id = pending.job_id.clone();
        let modality = pending.modality;

        loop {
            if !std::mem::take(&mut pending.drained_at_submit) {
                wait_for_queue_empty(&mut pending.queue).await?;
            }

            tracing::info!(job_id = %job_id, "Queue drained, fetching result");
            transition(&self.state_tx, JobState::Fetching { job_id: job_id.clone() });

            let fetch = self.backend.history(&job_id);
            let record = match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => {
                    return Err(fail(&self.state_tx, Some(&job_id), JobError::Fetch(e.into())));
                }
                Err(_) => {
                    let failure = RequestFailure::TimedOut(self.config.fetch_timeout);
                    return Err(fail(&self.state_tx, Some(&job_id), JobError::Fetch(failure)));
                }
            };

            match history::resolve(&record, &job_id, modality, &self.config.outputs_base_url) {
                FetchOutcome::Ready(artifact) => {
                    tracing::info!(job_id = %job_id, url = %artifact.url, "Artifact ready");
                    self.artifact = Some(artifact.clone());
                    transition(
                        &self.state_tx,
                        JobState::Done {
                            artifact: artifact.clone(),
                        },
                    );
                    return Ok(artifact);
                }
                FetchOutcome::NotReady => {
                    tracing::debug!(job_id = %job_id, "Artifact not ready, waiting for next queue drain");
                }
            }
        }
    }

    /// Submit and wait for the artifact.
    pub async fn generate(
        &mut self,
        modality: Modality,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GeneratedArtifact, JobError> {
        self.submit(modality, prompt, params).await?;
        self.await_artifact().await
    }

    /// Download the current artifact into `dir` as
    /// `generated-{image|audio}.{ext}`, returning the written path.
    pub async fn download_to(&self, dir: &Path) -> Result<PathBuf, JobError> {
        let artifact = self.artifact.as_ref().ok_or(JobError::NoArtifact)?;

        let bytes = match tokio::time::timeout(
            self.config.fetch_timeout,
            self.backend.download(&artifact.url),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(JobError::Download(e.into())),
            Err(_) => {
                return Err(JobError::Download(RequestFailure::TimedOut(
                    self.config.fetch_timeout,
                )))
            }
        };

        let path = dir.join(download_name(artifact));
        tokio::fs::write(&path, &bytes).await?;
        tracing::info!(path = %path.display(), size = bytes.len(), "Artifact saved");
        Ok(path)
    }

    // ---- private helpers ----

    async fn submit_workflow(
        &mut self,
        modality: Modality,
        workflow: &WorkflowGraph,
    ) -> Result<JobId, JobError> {
        let mut queue = self.progress.subscribe_queue();
        self.set_state(JobState::Submitting);

        let client_id = self.progress.client_id();
        let submit = self.backend.submit(workflow, client_id.as_deref());
        let response = match tokio::time::timeout(self.config.submit_timeout, submit).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(fail(&self.state_tx, None, JobError::Submission(e.into()))),
            Err(_) => {
                let failure = RequestFailure::TimedOut(self.config.submit_timeout);
                return Err(fail(&self.state_tx, None, JobError::Submission(failure)));
            }
        };

        let job_id = response.prompt_id;
        tracing::info!(
            job_id = %job_id,
            modality = %modality,
            queue_number = ?response.number,
            client_id = ?client_id,
            "Workflow submitted",
        );

        // Marks the current value seen, so a repeated empty frame is not a
        // second trigger.
        let drained_at_submit = queue.borrow_and_update().is_some_and(|q| q.is_empty());
        if drained_at_submit {
            tracing::debug!(job_id = %job_id, "Queue already empty at submission");
        }

        self.pending = Some(PendingJob {
            job_id: job_id.clone(),
            modality,
            queue,
            drained_at_submit,
        });
        self.set_state(JobState::AwaitingCompletion {
            job_id: job_id.clone(),
        });
        Ok(job_id)
    }

    fn set_state(&self, state: JobState) {
        transition(&self.state_tx, state);
    }
}

fn transition(state_tx: &watch::Sender<JobState>, state: JobState) {
    state_tx.send_replace(state);
}

fn fail(state_tx: &watch::Sender<JobState>, job_id: Option<&str>, err: JobError) -> JobError {
    tracing::warn!(job_id = ?job_id, error = %err, "Generation failed");
    transition(
        state_tx,
        JobState::Failed {
            job_id: job_id.map(str::to_string),
            reason: err.to_string(),
        },
    );
    err
}

/// Resolve once the queue depth changes to zero.
async fn wait_for_queue_empty(
    queue: &mut watch::Receiver<Option<QueueStatus>>,
) -> Result<(), JobError> {
    loop {
        queue.changed().await.map_err(|_| JobError::ChannelClosed)?;
        if queue.borrow_and_update().is_some_and(|q| q.is_empty()) {
            return Ok(());
        }
    }
}

fn download_name(artifact: &GeneratedArtifact) -> String {
    let ext = Path::new(&artifact.filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(artifact.modality.default_extension());
    format!("generated-{}.{ext}", artifact.modality)
}
