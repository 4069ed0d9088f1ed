//! # Dirty Tracking
//!
//! Records which nodes changed since the last commit.
//!
//! - **Leaves**: keys of non-container nodes that were written.
//! - **Elements**: container keys mapped to `true` when the container itself
//!   was written, `false` when it only contains a dirty descendant.
//!
//! Any dirty node also puts the root in `elements` as `true`. The element map
//! keeps insertion order so the transform engine can move the root last.
//!
//! The tracker is reset when a new pending state is cloned and after every
//! successful commit; in between it only grows.

use crate::editor::Editor;
use crate::errors::EditorError;
use crate::node::NodeKey;
use crate::state::EditorState;
use crate::transforms::MAX_TRANSFORM_ITERATIONS;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

/// How much of the document the renderer must revisit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyType {
    #[default]
    NoDirtyNodes,
    HasDirtyNodes,
    FullReconcile,
}

#[derive(Debug, Default, Clone)]
pub struct DirtyTracker {
    pub(crate) dirty_type: DirtyType,
    pub(crate) leaves: IndexSet<NodeKey>,
    pub(crate) elements: IndexMap<NodeKey, bool>,
    pub(crate) normalized: HashSet<NodeKey>,
}

impl DirtyTracker {
    pub fn dirty_type(&self) -> DirtyType {
        self.dirty_type
    }

    pub fn leaves(&self) -> &IndexSet<NodeKey> {
        &self.leaves
    }

    pub fn elements(&self) -> &IndexMap<NodeKey, bool> {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_type == DirtyType::NoDirtyNodes
            && self.leaves.is_empty()
            && self.elements.is_empty()
            && self.normalized.is_empty()
    }

    pub(crate) fn reset(&mut self) {
        *self = DirtyTracker::default();
    }

    /// Record a write to `key`; ancestors become (unintentionally) dirty
    pub(crate) fn mark(&mut self, state: &EditorState, key: NodeKey) {
        let Some(node) = state.node(key) else {
            return;
        };

        let mut parent = node.parent();
        while let Some(ancestor) = parent {
            self.elements.entry(ancestor).or_insert(false);
            parent = state.node(ancestor).and_then(|node| node.parent());
        }

        if node.is_element() {
            self.elements.insert(key, true);
        } else {
            self.leaves.insert(key);
        }
        self.elements.insert(NodeKey::ROOT, true);

        if self.dirty_type == DirtyType::NoDirtyNodes {
            self.dirty_type = DirtyType::HasDirtyNodes;
        }
    }
}

/// Mark `key` dirty on the active editor's tracker.
///
/// Fails once the transform engine has exceeded its iteration ceiling, which
/// is what stops a transform that keeps re-dirtying nodes.
pub(crate) fn mark_node_dirty(
    editor: &Editor,
    state: &EditorState,
    key: NodeKey,
) -> Result<(), EditorError> {
    if editor.inner.transform_iterations.get() > MAX_TRANSFORM_ITERATIONS {
        return Err(EditorError::InfiniteTransformLoop);
    }
    editor.inner.dirty.borrow_mut().mark(state, key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ElementData, Node, NodeData, TextData};

    fn nested_state() -> (EditorState, NodeKey, NodeKey) {
        let mut state = EditorState::empty();
        let p = NodeKey::from_raw(1);
        let t = NodeKey::from_raw(2);

        let mut paragraph = Node::new(
            p,
            "paragraph",
            NodeData::Element(ElementData {
                children: vec![t],
                indent: 0,
            }),
        );
        paragraph.parent = Some(NodeKey::ROOT);
        let mut text = Node::new(t, "text", NodeData::Text(TextData::default()));
        text.parent = Some(p);

        state.insert_node(paragraph);
        state.insert_node(text);
        (state, p, t)
    }

    #[test]
    fn test_marking_leaf_marks_ancestors_unintentionally() {
        let (state, p, t) = nested_state();
        let mut tracker = DirtyTracker::default();

        tracker.mark(&state, t);

        assert!(tracker.leaves.contains(&t));
        assert_eq!(tracker.elements.get(&p), Some(&false));
        assert_eq!(tracker.elements.get(&NodeKey::ROOT), Some(&true));
        assert_eq!(tracker.dirty_type, DirtyType::HasDirtyNodes);
    }

    #[test]
    fn test_intentional_mark_is_not_downgraded() {
        let (state, p, t) = nested_state();
        let mut tracker = DirtyTracker::default();

        tracker.mark(&state, p);
        tracker.mark(&state, t);

        assert_eq!(tracker.elements.get(&p), Some(&true));
    }

    #[test]
    fn test_full_reconcile_is_kept() {
        let (state, _, t) = nested_state();
        let mut tracker = DirtyTracker {
            dirty_type: DirtyType::FullReconcile,
            ..Default::default()
        };

        tracker.mark(&state, t);
        assert_eq!(tracker.dirty_type, DirtyType::FullReconcile);

        tracker.reset();
        assert!(tracker.is_empty());
    }
}
