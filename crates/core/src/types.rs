/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Backend-assigned identifier of a queued job (ComfyUI `prompt_id`).
pub type JobId = String;
