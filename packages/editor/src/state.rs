//! # Editor State
//!
//! An [`EditorState`] is one version of the document: a node map plus a
//! selection.
//!
//! ## Lifecycle
//!
//! ```text
//! clone(current) → pending (mutable) → commit → frozen (Rc, shared)
//! ```
//!
//! Node entries are `Rc<Node>`, so cloning a snapshot for a new update is a
//! shallow copy; the first write to a node clones just that node
//! (`Rc::make_mut`). Once frozen, a snapshot is only ever handed out behind an
//! `Rc` and every write path rejects it.

use crate::context::{self, ActiveState};
use crate::editor::Editor;
use crate::node::{Node, NodeData, NodeKey};
use crate::selection::Selection;
use std::collections::HashMap;
use std::rc::Rc;

/// Separator placed between sibling blocks in text content
pub const DOUBLE_LINE_BREAK: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct EditorState {
    pub(crate) node_map: HashMap<NodeKey, Rc<Node>>,
    pub(crate) selection: Option<Selection>,
    pub(crate) read_only: bool,
    pub(crate) flush_sync: bool,
}

impl EditorState {
    /// State containing only an empty root
    pub fn empty() -> Self {
        let mut node_map = HashMap::new();
        node_map.insert(NodeKey::ROOT, Rc::new(Node::root()));
        Self {
            node_map,
            selection: None,
            read_only: false,
            flush_sync: false,
        }
    }

    /// Writable copy used as the next pending state
    pub(crate) fn clone_for_update(&self) -> Self {
        Self {
            node_map: self.node_map.clone(),
            selection: None,
            read_only: false,
            flush_sync: false,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.read_only
    }

    pub(crate) fn freeze(&mut self) {
        self.read_only = true;
    }

    /// Only the root and no selection
    pub fn is_empty(&self) -> bool {
        self.node_map.len() == 1 && self.selection.is_none()
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn node(&self, key: NodeKey) -> Option<&Rc<Node>> {
        self.node_map.get(&key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.node_map.contains_key(&key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Rc<Node>> {
        self.node_map.values()
    }

    pub fn root(&self) -> Option<&Rc<Node>> {
        self.node(NodeKey::ROOT)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Reachable from the root through parent links
    pub fn is_attached(&self, key: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(key) = current {
            if key.is_root() {
                return true;
            }
            current = match self.node(key) {
                Some(node) => node.parent,
                None => return false,
            };
        }
        false
    }

    /// Text of the whole document, blocks separated by blank lines
    pub fn text_content(&self) -> String {
        self.node_text_content(NodeKey::ROOT)
    }

    pub fn node_text_content(&self, key: NodeKey) -> String {
        let mut out = String::new();
        self.write_text_content(key, &mut out);
        out
    }

    fn write_text_content(&self, key: NodeKey, out: &mut String) {
        let Some(node) = self.node(key) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => out.push_str(&text.text),
            NodeData::LineBreak => out.push('\n'),
            NodeData::Decorator(_) => {}
            NodeData::Element(element) => {
                let last = element.children.len().saturating_sub(1);
                for (index, child) in element.children.iter().enumerate() {
                    self.write_text_content(*child, out);
                    let child_is_block = self.node(*child).is_some_and(|child| child.is_element());
                    if child_is_block && index != last {
                        out.push_str(DOUBLE_LINE_BREAK);
                    }
                }
            }
        }
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.node_map.get_mut(&key).map(Rc::make_mut)
    }

    pub(crate) fn insert_node(&mut self, node: Node) {
        self.node_map.insert(node.key(), Rc::new(node));
    }

    pub(crate) fn remove_node(&mut self, key: NodeKey) {
        self.node_map.remove(&key);
    }

    /// Run `f` with this snapshot as the active, read-only state
    pub fn read<R>(self: &Rc<Self>, editor: &Editor, f: impl FnOnce() -> R) -> R {
        let _guard = context::enter(editor, ActiveState::Snapshot(Rc::clone(self)), true);
        f()
    }
}

impl Default for EditorState {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ElementData, TextData};

    fn paragraph_with_text(state: &mut EditorState, p: u64, t: u64, text: &str) {
        let p_key = NodeKey::from_raw(p);
        let t_key = NodeKey::from_raw(t);

        let mut text_node = Node::new(
            t_key,
            "text",
            NodeData::Text(TextData {
                text: text.to_string(),
                ..Default::default()
            }),
        );
        text_node.parent = Some(p_key);

        let mut paragraph = Node::new(
            p_key,
            "paragraph",
            NodeData::Element(ElementData {
                children: vec![t_key],
                indent: 0,
            }),
        );
        paragraph.parent = Some(NodeKey::ROOT);

        state.insert_node(text_node);
        state.insert_node(paragraph);
        state
            .node_mut(NodeKey::ROOT)
            .and_then(Node::children_mut)
            .unwrap()
            .push(p_key);
    }

    #[test]
    fn test_empty_state() {
        let state = EditorState::empty();
        assert!(state.is_empty());
        assert_eq!(state.len(), 1);
        assert_eq!(state.text_content(), "");
        assert!(!state.is_frozen());
    }

    #[test]
    fn test_text_content_separates_blocks() {
        let mut state = EditorState::empty();
        paragraph_with_text(&mut state, 1, 2, "hello");
        paragraph_with_text(&mut state, 3, 4, "world");

        assert_eq!(state.text_content(), "hello\n\nworld");
    }

    #[test]
    fn test_clone_for_update_shares_nodes() {
        let mut state = EditorState::empty();
        paragraph_with_text(&mut state, 1, 2, "hi");

        let mut next = state.clone_for_update();
        let key = NodeKey::from_raw(2);
        assert!(Rc::ptr_eq(state.node(key).unwrap(), next.node(key).unwrap()));

        next.node_mut(key).and_then(Node::text_mut).unwrap().text = "bye".to_string();
        assert_eq!(state.text_content(), "hi");
        assert_eq!(next.text_content(), "bye");
    }

    #[test]
    fn test_detached_node_is_not_attached() {
        let mut state = EditorState::empty();
        paragraph_with_text(&mut state, 1, 2, "hi");
        assert!(state.is_attached(NodeKey::from_raw(2)));

        state.node_mut(NodeKey::from_raw(1)).unwrap().parent = None;
        assert!(!state.is_attached(NodeKey::from_raw(2)));
        assert!(!state.is_attached(NodeKey::from_raw(99)));
    }
}
