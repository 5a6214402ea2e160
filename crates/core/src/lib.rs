//! Backend-independent building blocks for the generation client.
//!
//! - [`workflow`]: the ComfyUI API-format job graph and its validation.
//! - [`templates`]: pure builders turning a prompt plus parameters into
//!   a complete image or audio workflow.
//! - [`error`]: the [`WorkflowError`] taxonomy shared by both.

pub mod error;
pub mod templates;
pub mod types;
pub mod workflow;

pub use error::WorkflowError;
pub use templates::{GenerationParams, ImageSize, ImageStyle, Modality, OutputLocator};
pub use workflow::{InputValue, NodeLink, WorkflowGraph, WorkflowNode};
