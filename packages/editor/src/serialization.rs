//! # State Serialization
//!
//! A snapshot serializes to a tree of `{type, version, children?, ...}`
//! records under a top-level `root`. Parsing looks each type up in the
//! editor's [`NodeRegistry`](crate::NodeRegistry), runs its import routine and
//! attaches children recursively, allocating fresh keys from the editor.

use crate::editor::Editor;
use crate::errors::EditorError;
use crate::node::{Node, NodeData, NodeKey};
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

fn default_version() -> u32 {
    1
}

/// One serialized node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SerializedNode>>,

    /// Kind-specific fields (text, format, indent, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Serialized snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEditorState {
    pub root: SerializedNode,
}

/// Build a frozen snapshot from its serialized form
pub(crate) fn parse_state(
    editor: &Editor,
    serialized: &SerializedEditorState,
) -> Result<EditorState, EditorError> {
    let registry = editor.inner.registry.borrow();
    let root = &serialized.root;
    if root.node_type != "root" {
        return Err(EditorError::InvalidStructure(format!(
            "expected root record, found {}",
            root.node_type
        )));
    }

    let mut state = EditorState::empty();
    let root_data = import_node(&registry, root)?;
    if let (Some(node), NodeData::Element(mut element)) = (state.node_mut(NodeKey::ROOT), root_data) {
        element.children.clear();
        node.data = NodeData::Element(element);
    }

    for child in root.children.iter().flatten() {
        attach_child(editor, &registry, &mut state, NodeKey::ROOT, child)?;
    }

    state.freeze();
    debug!(nodes = state.len(), "Parsed editor state");
    Ok(state)
}

fn import_node(registry: &NodeRegistry, serialized: &SerializedNode) -> Result<NodeData, EditorError> {
    let class = registry.get(&serialized.node_type)?;
    let import = class
        .import()
        .ok_or_else(|| EditorError::ImportNotImplemented(serialized.node_type.clone()))?;
    let data = import(serialized)?;
    if !class.accepts(&data) {
        return Err(EditorError::InvalidStructure(format!(
            "import for {} produced a {:?} payload",
            serialized.node_type,
            class.kind()
        )));
    }
    Ok(data)
}

fn attach_child(
    editor: &Editor,
    registry: &NodeRegistry,
    state: &mut EditorState,
    parent: NodeKey,
    serialized: &SerializedNode,
) -> Result<(), EditorError> {
    let mut data = import_node(registry, serialized)?;
    if let NodeData::Element(element) = &mut data {
        element.children.clear();
    }

    let key = editor.next_key();
    let is_element = matches!(data, NodeData::Element(_));
    let mut node = Node::new(key, serialized.node_type.clone(), data);
    node.parent = Some(parent);
    state.insert_node(node);

    if let Some(children) = state.node_mut(parent).and_then(Node::children_mut) {
        children.push(key);
    }

    if is_element {
        for child in serialized.children.iter().flatten() {
            attach_child(editor, registry, state, key, child)?;
        }
    }
    Ok(())
}

/// Serialize a snapshot through the editor's registry
pub(crate) fn export_state(
    editor: &Editor,
    state: &EditorState,
) -> Result<SerializedEditorState, EditorError> {
    let registry = editor.inner.registry.borrow();
    Ok(SerializedEditorState {
        root: export_node(&registry, state, NodeKey::ROOT)?,
    })
}

fn export_node(
    registry: &NodeRegistry,
    state: &EditorState,
    key: NodeKey,
) -> Result<SerializedNode, EditorError> {
    let node = state.node(key).ok_or(EditorError::NodeNotFound(key))?;
    let class = registry.get(node.node_type())?;

    let children = if node.is_element() {
        let mut serialized = Vec::with_capacity(node.children().len());
        for child in node.children() {
            serialized.push(export_node(registry, state, *child)?);
        }
        Some(serialized)
    } else {
        None
    };

    Ok(SerializedNode {
        node_type: node.node_type().to_string(),
        version: class.version(),
        children,
        fields: class.export_fields(node),
    })
}
