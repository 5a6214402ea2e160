/// Errors raised while building or validating a workflow graph.
///
/// [`EmptyPrompt`](Self::EmptyPrompt) and
/// [`InvalidParameter`](Self::InvalidParameter) are caller input errors and
/// are detected before any graph is constructed. The structural variants
/// can only come from a broken template and indicate a programming error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Node '{node_id}' input '{input}' references missing node '{target}'")]
    DanglingEdge {
        node_id: String,
        input: String,
        target: String,
    },

    #[error("Workflow graph contains a cycle through node '{node_id}'")]
    Cycle { node_id: String },
}

impl WorkflowError {
    /// Whether this error was caused by caller-supplied input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::EmptyPrompt | Self::InvalidParameter { .. })
    }
}
