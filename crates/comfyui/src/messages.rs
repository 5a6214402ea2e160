//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. The `type` is read first; only the
//! payloads of known kinds are deserialized. Unknown kinds parse to
//! [`ComfyUIMessage::Other`] rather than failing, so new backend event
//! types never break the channel.
//!
//! Payload fields are optional: a frame with the right shape but a missing
//! field is well-formed, and deciding whether it carries a usable value is
//! left to the processor.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Known ComfyUI WebSocket messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    Status(StatusData),
    /// Step-level progress of the running sampler.
    Progress(ProgressData),
    /// A prompt has started executing.
    ExecutionStart(ExecutionData),
    /// A prompt finished successfully.
    ExecutionSuccess(ExecutionData),
    /// A node is executing, or the prompt is done when `node` is `None`.
    Executing(ExecutingData),
    /// Execution failed with an error.
    ExecutionError(ErrorData),
    /// Any other message kind, carried by name.
    Other(String),
}

impl ComfyUIMessage {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::Status(_) => "status",
            Self::Progress(_) => "progress",
            Self::ExecutionStart(_) => "execution_start",
            Self::ExecutionSuccess(_) => "execution_success",
            Self::Executing(_) => "executing",
            Self::ExecutionError(_) => "execution_error",
            Self::Other(kind) => kind,
        }
    }
}

/// Payload for `status` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub status: Option<QueueInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueInfo {
    #[serde(default)]
    pub exec_info: Option<ExecInfo>,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecInfo {
    #[serde(default)]
    pub queue_remaining: Option<u32>,
}

impl StatusData {
    /// `status.exec_info.queue_remaining`, if every level is present.
    pub fn queue_remaining(&self) -> Option<u32> {
        self.status.as_ref()?.exec_info.as_ref()?.queue_remaining
    }
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Completed steps.
    #[serde(default)]
    pub value: Option<u32>,
    /// Total steps.
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload for `execution_start` and `execution_success` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionData {
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executing` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// A frame that could not be parsed. Recovered locally by the channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelParseError {
    /// Not JSON, or not an object with a string `type`.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The `data` of a known kind has the wrong shape.
    #[error("Invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a ComfyUI WebSocket text frame.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, ChannelParseError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(ChannelParseError::Malformed)?;
    let data = if raw.data.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        raw.data
    };

    let msg = match raw.kind.as_str() {
        "status" => ComfyUIMessage::Status(payload("status", data)?),
        "progress" => ComfyUIMessage::Progress(payload("progress", data)?),
        "execution_start" => ComfyUIMessage::ExecutionStart(payload("execution_start", data)?),
        "execution_success" => {
            ComfyUIMessage::ExecutionSuccess(payload("execution_success", data)?)
        }
        "executing" => ComfyUIMessage::Executing(payload("executing", data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(payload("execution_error", data)?),
        _ => ComfyUIMessage::Other(raw.kind),
    };
    Ok(msg)
}

fn payload<T: DeserializeOwned>(
    kind: &'static str,
    data: serde_json::Value,
) -> Result<T, ChannelParseError> {
    serde_json::from_value(data).map_err(|source| ChannelParseError::InvalidPayload { kind, source })
}
