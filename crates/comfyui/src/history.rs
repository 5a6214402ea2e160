//! Typed access to ComfyUI history records.
//!
//! `GET /api/history/{id}` returns
//! `{"<id>": {"outputs": {"<node>": {"images": [{"filename", "subfolder", "type"}]}}}}`.
//! Until the job has produced its output any level of that path may be
//! missing; that means "not ready yet" and is never an error.

use genstudio_core::{Modality, OutputLocator};
use serde::{Deserialize, Serialize};

/// One file entry under an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage class reported by ComfyUI (`output`, `temp`).
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// A generated file that can be fetched from the outputs host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub job_id: String,
    pub modality: Modality,
    pub filename: String,
    pub subfolder: String,
    pub url: String,
}

/// Result of one history lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready(GeneratedArtifact),
    NotReady,
}

/// Read `history[job_id].outputs[node_id][output_key][0]`.
///
/// Returns `None` when any step of the path is absent or the entry does
/// not carry a filename.
pub fn locate_artifact(
    history: &serde_json::Value,
    job_id: &str,
    locator: OutputLocator,
) -> Option<OutputFile> {
    let entry = history
        .get(job_id)?
        .get("outputs")?
        .get(locator.node_id)?
        .get(locator.output_key)?
        .get(0)?;

    match serde_json::from_value::<OutputFile>(entry.clone()) {
        Ok(file) if !file.filename.is_empty() => Some(file),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Unrecognised history output entry");
            None
        }
    }
}

/// Public URL of an output file under `base_url`.
pub fn artifact_url(base_url: &str, file: &OutputFile) -> String {
    let base = base_url.trim_end_matches('/');
    let subfolder = file.subfolder.trim_matches('/');
    if subfolder.is_empty() {
        format!("{base}/{}", file.filename)
    } else {
        format!("{base}/{subfolder}/{}", file.filename)
    }
}

/// Resolve the artifact of `job_id` from a raw history record.
pub fn resolve(
    history: &serde_json::Value,
    job_id: &str,
    modality: Modality,
    outputs_base_url: &str,
) -> FetchOutcome {
    match locate_artifact(history, job_id, modality.output_locator()) {
        Some(file) => FetchOutcome::Ready(GeneratedArtifact {
            job_id: job_id.to_string(),
            modality,
            url: artifact_url(outputs_base_url, &file),
            filename: file.filename,
            subfolder: file.subfolder,
        }),
        None => FetchOutcome::NotReady,
    }
}
