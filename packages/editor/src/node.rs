//! # Document Nodes
//!
//! Nodes are plain tagged values stored in an [`EditorState`](crate::EditorState)
//! node map. Behavior that varies per node type (import, export, decorate,
//! transforms) lives in the [`NodeRegistry`](crate::NodeRegistry), looked up by
//! the node's type name.
//!
//! A node refers to its parent and children by [`NodeKey`], never by pointer,
//! so cloning a snapshot only clones the map of `Rc<Node>` handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a node across snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(u64);

impl NodeKey {
    /// Key of the root container, present in every snapshot
    pub const ROOT: NodeKey = NodeKey(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        NodeKey(raw)
    }

    pub fn is_root(self) -> bool {
        self == NodeKey::ROOT
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("root")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Broad category of a node, fixed by its registered class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element,
    Text,
    LineBreak,
    Decorator,
}

impl NodeKind {
    /// Containers track their own dirtiness separately from leaves
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Element)
    }
}

/// Text node editing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    #[default]
    Normal,
    /// Treated as a single unit, never merged with neighbours
    Token,
    /// Like `Token`, but deleted as a whole
    Segmented,
}

/// Kind-specific node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(ElementData),
    Text(TextData),
    LineBreak,
    Decorator(DecoratorData),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementData {
    pub children: Vec<NodeKey>,
    pub indent: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextData {
    pub text: String,
    pub format: u32,
    pub style: String,
    pub mode: TextMode,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecoratorData {
    pub payload: serde_json::Value,
}

/// A single node in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    key: NodeKey,
    pub(crate) parent: Option<NodeKey>,
    node_type: String,
    pub(crate) data: NodeData,
}

impl Node {
    pub(crate) fn new(key: NodeKey, node_type: impl Into<String>, data: NodeData) -> Self {
        Self {
            key,
            parent: None,
            node_type: node_type.into(),
            data,
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(NodeKey::ROOT, "root", NodeData::Element(ElementData::default()))
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Registered type name (e.g. `"paragraph"`)
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn kind(&self) -> NodeKind {
        match &self.data {
            NodeData::Element(_) if self.key.is_root() => NodeKind::Root,
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::LineBreak => NodeKind::LineBreak,
            NodeData::Decorator(_) => NodeKind::Decorator,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn children(&self) -> &[NodeKey] {
        match &self.data {
            NodeData::Element(element) => &element.children,
            _ => &[],
        }
    }

    pub fn as_text(&self) -> Option<&TextData> {
        match &self.data {
            NodeData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Plain `text` nodes in normal mode may be merged and removed by normalization
    pub fn is_simple_text(&self) -> bool {
        self.node_type == "text"
            && matches!(&self.data, NodeData::Text(text) if text.mode == TextMode::Normal)
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<NodeKey>> {
        match &mut self.data {
            NodeData::Element(element) => Some(&mut element.children),
            _ => None,
        }
    }

    pub(crate) fn text_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.data {
            NodeData::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_display() {
        assert_eq!(NodeKey::ROOT.to_string(), "root");
        assert_eq!(NodeKey::from_raw(7).to_string(), "7");
    }

    #[test]
    fn test_node_kind_from_data() {
        let root = Node::root();
        assert_eq!(root.kind(), NodeKind::Root);

        let paragraph = Node::new(
            NodeKey::from_raw(1),
            "paragraph",
            NodeData::Element(ElementData::default()),
        );
        assert_eq!(paragraph.kind(), NodeKind::Element);
        assert!(paragraph.kind().is_container());

        let text = Node::new(
            NodeKey::from_raw(2),
            "text",
            NodeData::Text(TextData {
                text: "hi".to_string(),
                ..Default::default()
            }),
        );
        assert!(text.is_simple_text());
        assert!(!text.kind().is_container());
    }

    #[test]
    fn test_token_text_is_not_simple() {
        let token = Node::new(
            NodeKey::from_raw(3),
            "text",
            NodeData::Text(TextData {
                text: "@mention".to_string(),
                mode: TextMode::Token,
                ..Default::default()
            }),
        );
        assert!(!token.is_simple_text());
    }
}
