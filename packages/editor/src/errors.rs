//! Error types for the editor

use crate::node::NodeKey;
use crate::render::RenderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("No active editor context: call this from inside update() or read()")]
    NoActiveContext,

    #[error("Cannot mutate nodes in a read-only scope")]
    ReadOnly,

    #[error("Editor state is frozen and cannot be mutated")]
    FrozenSnapshot,

    #[error(
        "Selection has been lost because the previously selected nodes have been removed \
         and selection wasn't moved to another node"
    )]
    SelectionLost,

    #[error("One or more transforms are endlessly triggering additional transforms")]
    InfiniteTransformLoop,

    #[error("Node type not registered: {0}")]
    UnregisteredNodeType(String),

    #[error("Node type {0} does not implement import")]
    ImportNotImplemented(String),

    #[error("Editor state is empty: the root node must not be the only content")]
    EmptyEditorState,

    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("Node is not an element: {0}")]
    NotAnElement(NodeKey),

    #[error("Node is not text: {0}")]
    NotText(NodeKey),

    #[error("Would create cycle")]
    CycleDetected,

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Update callback failed: {0}")]
    Callback(String),
}

impl EditorError {
    /// Build a callback error from any displayable message
    pub fn callback(message: impl Into<String>) -> Self {
        EditorError::Callback(message.into())
    }
}
