//! ComfyUI job graph model and structural validation.
//!
//! A workflow in ComfyUI "API format" is a JSON object keyed by node id.
//! Each node names its operation (`class_type`), a display title under
//! `_meta`, and a map of inputs. An input is either a literal value or a
//! link to another node's output slot, encoded as `["<node_id>", <slot>]`:
//!
//! ```json
//! {
//!   "8": {
//!     "inputs": { "samples": ["3", 0], "vae": ["4", 2] },
//!     "class_type": "VAEDecode",
//!     "_meta": { "title": "VAE Decode" }
//!   }
//! }
//! ```
//!
//! Node semantics are opaque here; only the topology is checked.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Edge reference to output slot `.1` of node `.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

impl NodeLink {
    pub fn new(source: impl Into<String>, slot: u32) -> Self {
        Self(source.into(), slot)
    }

    /// Id of the node this link points at.
    pub fn source(&self) -> &str {
        &self.0
    }

    /// Output slot index on the source node.
    pub fn slot(&self) -> u32 {
        self.1
    }
}

/// A single node input: an edge to another node or a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Link(NodeLink),
    Literal(serde_json::Value),
}

impl InputValue {
    /// The literal as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(value) => value.as_str(),
            Self::Link(_) => None,
        }
    }
}

/// Display metadata carried alongside a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub title: String,
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    pub class_type: String,
    #[serde(rename = "_meta", default)]
    pub meta: NodeMeta,
}

impl WorkflowNode {
    /// Create a node with no inputs.
    pub fn new(class_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            inputs: BTreeMap::new(),
            class_type: class_type.into(),
            meta: NodeMeta {
                title: title.into(),
            },
        }
    }

    /// Set a literal input.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Literal(value.into()));
        self
    }

    /// Connect an input to output `slot` of node `source`.
    pub fn with_link(mut self, name: impl Into<String>, source: impl Into<String>, slot: u32) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Link(NodeLink::new(source, slot)));
        self
    }

    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }

    /// All linked inputs as `(input_name, link)` pairs.
    pub fn links(&self) -> impl Iterator<Item = (&str, &NodeLink)> {
        self.inputs.iter().filter_map(|(name, value)| match value {
            InputValue::Link(link) => Some((name.as_str(), link)),
            InputValue::Literal(_) => None,
        })
    }
}

/// A complete job graph, keyed by node id.
///
/// Serializes transparently to the node map expected by `POST /api/prompt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any previous node with the same id.
    pub fn insert(&mut self, id: impl Into<String>, node: WorkflowNode) {
        self.nodes.insert(id.into(), node);
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check that every link resolves to a node in this graph and that the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for (node_id, node) in &self.nodes {
            for (input, link) in node.links() {
                if !self.nodes.contains_key(link.source()) {
                    return Err(WorkflowError::DanglingEdge {
                        node_id: node_id.clone(),
                        input: input.to_string(),
                        target: link.source().to_string(),
                    });
                }
            }
        }

        let mut marks = HashMap::with_capacity(self.nodes.len());
        for node_id in self.nodes.keys() {
            self.visit(node_id, &mut marks)?;
        }
        Ok(())
    }

    // ---- private helpers ----

    /// Depth-first walk along links; revisiting a node that is still on the
    /// stack means the graph has a cycle.
    fn visit<'a>(
        &'a self,
        node_id: &'a str,
        marks: &mut HashMap<&'a str, Visit>,
    ) -> Result<(), WorkflowError> {
        match marks.get(node_id) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                return Err(WorkflowError::Cycle {
                    node_id: node_id.to_string(),
                })
            }
            None => {}
        }

        marks.insert(node_id, Visit::InProgress);
        if let Some(node) = self.nodes.get(node_id) {
            for (_, link) in node.links() {
                self.visit(link.source(), marks)?;
            }
        }
        marks.insert(node_id, Visit::Done);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
