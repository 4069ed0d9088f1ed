//! # Node Mutations
//!
//! The node API used inside `update`/`read` scopes. Every call locates the
//! document through the active context, so callers pass node keys, never
//! snapshots.
//!
//! ```rust,ignore
//! editor.update(|| {
//!     let paragraph = create_paragraph()?;
//!     paragraph.append(create_text("hello")?)?;
//!     get_root()?.append(paragraph)
//! })?;
//! ```
//!
//! Reads see the latest pending version of a node. Writes fail with
//! [`EditorError::ReadOnly`] or [`EditorError::FrozenSnapshot`] outside a
//! writable scope, and mark every touched node dirty.

use crate::context;
use crate::dirty::mark_node_dirty;
use crate::editor::Editor;
use crate::errors::EditorError;
use crate::node::{DecoratorData, ElementData, Node, NodeData, NodeKey, NodeKind, TextData, TextMode};
use crate::selection::Selection;
use crate::state::EditorState;
use serde_json::Value;
use std::rc::Rc;

// ---- Creation ---------------------------------------------------------------

/// Key of the root container
pub fn get_root() -> Result<NodeKey, EditorError> {
    context::read_active_state(|_| NodeKey::ROOT)
}

/// Create a detached node of a registered type
pub fn create_node(node_type: &str, data: NodeData) -> Result<NodeKey, EditorError> {
    context::write_active_state(|state, editor| {
        {
            let registry = editor.inner.registry.borrow();
            let class = registry.get(node_type)?;
            if class.kind() == NodeKind::Root {
                return Err(EditorError::InvalidStructure(
                    "only one root node may exist".to_string(),
                ));
            }
            if !class.accepts(&data) {
                return Err(EditorError::InvalidStructure(format!(
                    "{node_type} is a {:?} node",
                    class.kind()
                )));
            }
        }
        let key = editor.next_key();
        state.insert_node(Node::new(key, node_type, data));
        mark_node_dirty(editor, state, key)?;
        Ok(key)
    })
}

pub fn create_element(node_type: &str) -> Result<NodeKey, EditorError> {
    create_node(node_type, NodeData::Element(ElementData::default()))
}

pub fn create_paragraph() -> Result<NodeKey, EditorError> {
    create_element("paragraph")
}

pub fn create_text(text: impl Into<String>) -> Result<NodeKey, EditorError> {
    create_node(
        "text",
        NodeData::Text(TextData {
            text: text.into(),
            ..Default::default()
        }),
    )
}

pub fn create_line_break() -> Result<NodeKey, EditorError> {
    create_node("linebreak", NodeData::LineBreak)
}

pub fn create_decorator(node_type: &str, payload: Value) -> Result<NodeKey, EditorError> {
    create_node(node_type, NodeData::Decorator(DecoratorData { payload }))
}

// ---- Lookup -----------------------------------------------------------------

/// Latest version of `key`, if it exists in the active snapshot
pub fn get_node_by_key(key: NodeKey) -> Result<Option<Rc<Node>>, EditorError> {
    context::read_active_state(|state| state.node(key).cloned())
}

/// Keys of every node of `node_type`, attached or not
pub fn nodes_of_type(node_type: &str) -> Result<Vec<NodeKey>, EditorError> {
    context::read_active_state(|state| {
        let mut keys: Vec<NodeKey> = state
            .nodes()
            .filter(|node| node.node_type() == node_type)
            .map(|node| node.key())
            .collect();
        keys.sort();
        keys
    })
}

pub fn get_composition_key() -> Result<Option<NodeKey>, EditorError> {
    context::active_editor().map(|editor| editor.composition_key())
}

/// Start or end an IME composition on `key`.
///
/// Changing the composition key forces the current update to commit
/// synchronously.
pub fn set_composition_key(key: Option<NodeKey>) -> Result<(), EditorError> {
    context::write_active_state(|state, editor| {
        let previous = editor.inner.composition_key.replace(key);
        for touched in [previous, key].into_iter().flatten() {
            if state.contains(touched) {
                mark_node_dirty(editor, state, touched)?;
            }
        }
        Ok(())
    })
}

fn read_node<R>(key: NodeKey, f: impl FnOnce(&EditorState, &Node) -> R) -> Result<R, EditorError> {
    context::read_active_state(|state| state.node(key).map(|node| f(state, node)))?
        .ok_or(EditorError::NodeNotFound(key))
}

impl NodeKey {
    pub fn node_type(self) -> Result<String, EditorError> {
        read_node(self, |_, node| node.node_type().to_string())
    }

    pub fn kind(self) -> Result<NodeKind, EditorError> {
        read_node(self, |_, node| node.kind())
    }

    pub fn parent(self) -> Result<Option<NodeKey>, EditorError> {
        read_node(self, |_, node| node.parent())
    }

    pub fn children(self) -> Result<Vec<NodeKey>, EditorError> {
        read_node(self, |_, node| node.children().to_vec())
    }

    pub fn is_attached(self) -> Result<bool, EditorError> {
        context::read_active_state(|state| state.is_attached(self))
    }

    pub fn previous_sibling(self) -> Result<Option<NodeKey>, EditorError> {
        read_node(self, |state, _| sibling(state, self, -1))
    }

    pub fn next_sibling(self) -> Result<Option<NodeKey>, EditorError> {
        read_node(self, |state, _| sibling(state, self, 1))
    }

    /// Raw text of a text node
    pub fn text(self) -> Result<String, EditorError> {
        read_node(self, |_, node| node.as_text().map(|text| text.text.clone()))?
            .ok_or(EditorError::NotText(self))
    }

    /// Text of this node and its descendants
    pub fn text_content(self) -> Result<String, EditorError> {
        read_node(self, |state, _| state.node_text_content(self))
    }

    // ---- Writes -------------------------------------------------------------

    pub fn mark_dirty(self) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            require(state, self)?;
            mark_node_dirty(editor, state, self)
        })
    }

    /// Append `child` as the last child, moving it out of its old parent
    pub fn append(self, child: NodeKey) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            let index = element_children(state, self)?.len();
            insert_child(state, editor, self, index, child)
        })
    }

    pub fn insert_before(self, node: NodeKey) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| insert_beside(state, editor, self, node, 0))
    }

    pub fn insert_after(self, node: NodeKey) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| insert_beside(state, editor, self, node, 1))
    }

    /// Detach from the parent; the node is dropped from the snapshot when the
    /// cycle ends unless it is attached again
    pub fn remove(self) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            if self.is_root() {
                return Err(EditorError::InvalidStructure(
                    "the root node cannot be removed".to_string(),
                ));
            }
            require(state, self)?;
            detach_node(state, editor, self)?;
            if let Some(Selection::Node(nodes)) = state.selection.as_mut() {
                nodes.delete(self);
            }
            Ok(())
        })
    }

    /// Put `replacement` where this node is and remove this node
    pub fn replace(self, replacement: NodeKey) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            if self == replacement {
                return Ok(());
            }
            insert_beside(state, editor, self, replacement, 0)?;
            detach_node(state, editor, self)?;
            if let Some(Selection::Node(nodes)) = state.selection.as_mut() {
                nodes.delete(self);
            }
            Ok(())
        })
    }

    /// Detach every child of this element
    pub fn clear(self) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            let children = element_children(state, self)?.to_vec();
            for child in children {
                detach_node(state, editor, child)?;
            }
            mark_node_dirty(editor, state, self)
        })
    }

    pub fn set_text(self, text: impl Into<String>) -> Result<(), EditorError> {
        let text = text.into();
        update_text(self, move |data| data.text = text)
    }

    pub fn set_format(self, format: u32) -> Result<(), EditorError> {
        update_text(self, move |data| data.format = format)
    }

    pub fn set_style(self, style: impl Into<String>) -> Result<(), EditorError> {
        let style = style.into();
        update_text(self, move |data| data.style = style)
    }

    pub fn set_mode(self, mode: TextMode) -> Result<(), EditorError> {
        update_text(self, move |data| data.mode = mode)
    }

    pub fn set_indent(self, indent: u32) -> Result<(), EditorError> {
        context::write_active_state(|state, editor| {
            mark_node_dirty(editor, state, self)?;
            match state.node_mut(self).map(|node| &mut node.data) {
                Some(NodeData::Element(element)) => {
                    element.indent = indent;
                    Ok(())
                }
                Some(_) => Err(EditorError::NotAnElement(self)),
                None => Err(EditorError::NodeNotFound(self)),
            }
        })
    }
}

fn update_text(key: NodeKey, f: impl FnOnce(&mut TextData)) -> Result<(), EditorError> {
    context::write_active_state(|state, editor| {
        let node = require(state, key)?;
        if node.as_text().is_none() {
            return Err(EditorError::NotText(key));
        }
        mark_node_dirty(editor, state, key)?;
        if let Some(text) = state.node_mut(key).and_then(Node::text_mut) {
            f(text);
        }
        Ok(())
    })
}

fn require(state: &EditorState, key: NodeKey) -> Result<&Rc<Node>, EditorError> {
    state.node(key).ok_or(EditorError::NodeNotFound(key))
}

fn element_children(state: &EditorState, key: NodeKey) -> Result<&[NodeKey], EditorError> {
    let node = require(state, key)?;
    if !node.is_element() {
        return Err(EditorError::NotAnElement(key));
    }
    Ok(node.children())
}

fn sibling(state: &EditorState, key: NodeKey, offset: isize) -> Option<NodeKey> {
    let parent = state.node(key)?.parent()?;
    let siblings = state.node(parent)?.children();
    let index = siblings.iter().position(|child| *child == key)?;
    let target = index.checked_add_signed(offset)?;
    siblings.get(target).copied()
}

pub(crate) fn previous_sibling(state: &EditorState, key: NodeKey) -> Option<NodeKey> {
    sibling(state, key, -1)
}

pub(crate) fn next_sibling(state: &EditorState, key: NodeKey) -> Option<NodeKey> {
    sibling(state, key, 1)
}

/// Unlink `key` from its parent, marking both dirty
pub(crate) fn detach_node(
    state: &mut EditorState,
    editor: &Editor,
    key: NodeKey,
) -> Result<(), EditorError> {
    let Some(parent) = state.node(key).and_then(|node| node.parent()) else {
        return Ok(());
    };
    mark_node_dirty(editor, state, key)?;
    mark_node_dirty(editor, state, parent)?;
    if let Some(children) = state.node_mut(parent).and_then(Node::children_mut) {
        children.retain(|child| *child != key);
    }
    if let Some(node) = state.node_mut(key) {
        node.parent = None;
    }
    Ok(())
}

fn insert_child(
    state: &mut EditorState,
    editor: &Editor,
    parent: NodeKey,
    index: usize,
    child: NodeKey,
) -> Result<(), EditorError> {
    if child.is_root() {
        return Err(EditorError::InvalidStructure(
            "the root node cannot be a child".to_string(),
        ));
    }
    require(state, child)?;
    element_children(state, parent)?;

    let mut ancestor = Some(parent);
    while let Some(key) = ancestor {
        if key == child {
            return Err(EditorError::CycleDetected);
        }
        ancestor = state.node(key).and_then(|node| node.parent());
    }

    // Removing first keeps the index valid when moving within one parent
    let old_index = state
        .node(child)
        .and_then(|node| node.parent())
        .filter(|old_parent| *old_parent == parent)
        .and_then(|_| state.node(parent))
        .and_then(|node| node.children().iter().position(|key| *key == child));
    detach_node(state, editor, child)?;

    let index = match old_index {
        Some(old_index) if old_index < index => index - 1,
        _ => index,
    };
    if let Some(children) = state.node_mut(parent).and_then(Node::children_mut) {
        let index = index.min(children.len());
        children.insert(index, child);
    }
    if let Some(node) = state.node_mut(child) {
        node.parent = Some(parent);
    }
    mark_node_dirty(editor, state, child)?;
    mark_node_dirty(editor, state, parent)
}

/// Insert `node` next to `anchor` (`after` = 0 before, 1 after)
fn insert_beside(
    state: &mut EditorState,
    editor: &Editor,
    anchor: NodeKey,
    node: NodeKey,
    after: usize,
) -> Result<(), EditorError> {
    let parent = require(state, anchor)?.parent().ok_or_else(|| {
        EditorError::InvalidStructure(format!("node {anchor} has no parent"))
    })?;
    if node == anchor {
        return Ok(());
    }
    // Detach before locating the anchor so its index is current
    detach_node(state, editor, node)?;
    let index = element_children(state, parent)?
        .iter()
        .position(|child| *child == anchor)
        .ok_or(EditorError::NodeNotFound(anchor))?;
    insert_child(state, editor, parent, index + after, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{set_selection, NodeSelection};
    use crate::update::UpdateOptions;
    use std::cell::RefCell;

    fn run(editor: &Editor, f: impl FnOnce() -> Result<(), EditorError> + 'static) {
        editor
            .update_with(f, UpdateOptions::new().discrete())
            .unwrap();
    }

    fn record<T: 'static>() -> (Rc<RefCell<Option<T>>>, Rc<RefCell<Option<T>>>) {
        let cell = Rc::new(RefCell::new(None));
        (cell.clone(), cell)
    }

    #[test]
    fn test_create_outside_scope_fails() {
        assert!(matches!(create_paragraph(), Err(EditorError::NoActiveContext)));
    }

    #[test]
    fn test_append_and_read_back() {
        let editor = Editor::builder().build().unwrap();
        let (keys, out) = record();
        run(&editor, move || {
            let paragraph = create_paragraph()?;
            let first = create_text("one")?;
            let second = create_line_break()?;
            paragraph.append(first)?;
            paragraph.append(second)?;
            get_root()?.append(paragraph)?;
            *out.borrow_mut() = Some((paragraph, first, second));
            Ok(())
        });

        let (paragraph, first, second) = keys.borrow().unwrap();
        editor
            .read(|| {
                assert_eq!(paragraph.children().unwrap(), vec![first, second]);
                assert_eq!(first.next_sibling().unwrap(), Some(second));
                assert_eq!(second.previous_sibling().unwrap(), Some(first));
                assert_eq!(first.parent().unwrap(), Some(paragraph));
                assert_eq!(paragraph.text_content().unwrap(), "one\n");
                assert!(first.is_attached().unwrap());
            })
            .unwrap();
    }

    #[test]
    fn test_writes_fail_in_read_scope() {
        let editor = Editor::builder().build().unwrap();
        editor
            .read(|| {
                assert!(matches!(create_paragraph(), Err(EditorError::FrozenSnapshot)));
                assert!(matches!(
                    NodeKey::ROOT.mark_dirty(),
                    Err(EditorError::FrozenSnapshot)
                ));
            })
            .unwrap();
    }

    #[test]
    fn test_append_rejects_cycle_and_root() {
        let editor = Editor::builder().build().unwrap();
        let (result, out) = record();
        run(&editor, move || {
            let outer = create_element("paragraph")?;
            let inner = create_element("paragraph")?;
            outer.append(inner)?;
            let cycle = inner.append(outer);
            let root = outer.append(NodeKey::ROOT);
            *out.borrow_mut() = Some((
                matches!(cycle, Err(EditorError::CycleDetected)),
                matches!(root, Err(EditorError::InvalidStructure(_))),
            ));
            Ok(())
        });
        assert_eq!(*result.borrow(), Some((true, true)));
    }

    #[test]
    fn test_append_moves_between_parents() {
        let editor = Editor::builder().build().unwrap();
        let (keys, out) = record();
        run(&editor, move || {
            let a = create_paragraph()?;
            let b = create_paragraph()?;
            let text = create_text("moving")?;
            get_root()?.append(a)?;
            get_root()?.append(b)?;
            a.append(text)?;
            b.append(text)?;
            *out.borrow_mut() = Some((a, b, text));
            Ok(())
        });

        let (a, b, text) = keys.borrow().unwrap();
        let state = editor.editor_state();
        assert!(state.node(a).unwrap().children().is_empty());
        assert_eq!(state.node(b).unwrap().children(), &[text]);
        assert_eq!(state.node(text).unwrap().parent(), Some(b));
    }

    #[test]
    fn test_insert_before_after_and_replace() {
        let editor = Editor::builder().build().unwrap();
        let (keys, out) = record();
        run(&editor, move || {
            let paragraph = create_paragraph()?;
            get_root()?.append(paragraph)?;
            let middle = create_text("m")?;
            paragraph.append(middle)?;
            let first = create_text("f")?;
            first.set_format(1)?;
            middle.insert_before(first)?;
            let last = create_text("l")?;
            last.set_format(2)?;
            middle.insert_after(last)?;
            let replacement = create_line_break()?;
            middle.replace(replacement)?;
            *out.borrow_mut() = Some((paragraph, first, replacement, last, middle));
            Ok(())
        });

        let (paragraph, first, replacement, last, middle) = keys.borrow().unwrap();
        let state = editor.editor_state();
        assert_eq!(
            state.node(paragraph).unwrap().children(),
            &[first, replacement, last]
        );
        assert!(!state.contains(middle));
        assert_eq!(state.text_content(), "f\nl");
    }

    #[test]
    fn test_removed_node_is_collected() {
        let editor = Editor::builder().build().unwrap();
        let (keys, out) = record();
        run(&editor, move || {
            let paragraph = create_paragraph()?;
            let text = create_text("bye")?;
            paragraph.append(text)?;
            get_root()?.append(paragraph)?;
            *out.borrow_mut() = Some((paragraph, text));
            Ok(())
        });
        let (paragraph, text) = keys.borrow().unwrap();

        run(&editor, move || paragraph.remove());

        let state = editor.editor_state();
        assert!(!state.contains(paragraph));
        assert!(!state.contains(text));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_drops_node_from_node_selection() {
        let editor = Editor::builder().build().unwrap();
        let (keys, out) = record();
        run(&editor, move || {
            let image = create_paragraph()?;
            get_root()?.append(image)?;
            set_selection(Some(Selection::Node(NodeSelection::new([image]))))?;
            *out.borrow_mut() = Some(image);
            Ok(())
        });
        let image = keys.borrow().unwrap();
        assert!(editor.editor_state().selection().is_some());

        run(&editor, move || image.remove());

        // Emptied node selections are dropped rather than treated as lost
        assert!(editor.editor_state().selection().is_none());
    }

    #[test]
    fn test_set_text_on_element_fails() {
        let editor = Editor::builder().build().unwrap();
        let (result, out) = record();
        run(&editor, move || {
            let paragraph = create_paragraph()?;
            *out.borrow_mut() = Some(matches!(
                paragraph.set_text("nope"),
                Err(EditorError::NotText(_))
            ));
            get_root()?.append(paragraph)
        });
        assert_eq!(*result.borrow(), Some(true));
    }

    #[test]
    fn test_unregistered_type_is_rejected() {
        let editor = Editor::builder().build().unwrap();
        let (result, out) = record();
        run(&editor, move || {
            *out.borrow_mut() = Some(matches!(
                create_element("heading"),
                Err(EditorError::UnregisteredNodeType(_))
            ));
            Ok(())
        });
        assert_eq!(*result.borrow(), Some(true));
    }
}
