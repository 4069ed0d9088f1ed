//! # Text Normalization
//!
//! Keeps runs of simple text canonical: empty simple text nodes are dropped
//! and adjacent simple text nodes with the same format and style are merged
//! into the earlier one.
//!
//! Selection points and the composition key that referred to an absorbed node
//! are moved onto the surviving node. Offsets count `char`s.

use crate::context;
use crate::dirty::mark_node_dirty;
use crate::editor::Editor;
use crate::errors::EditorError;
use crate::mutations::{detach_node, next_sibling, previous_sibling};
use crate::node::NodeKey;
use crate::selection::{PointKind, Selection};
use crate::state::EditorState;
use tracing::trace;

/// Normalize every dirty leaf; used when an update skips transforms
pub(crate) fn normalize_all_dirty_text_nodes(editor: &Editor) -> Result<(), EditorError> {
    let composition_key = editor.inner.composition_key.get();
    let leaves: Vec<NodeKey> = editor.inner.dirty.borrow().leaves.iter().copied().collect();
    for key in leaves.into_iter().filter(|key| Some(*key) != composition_key) {
        context::write_active_state(|state, editor| {
            if state.is_attached(key) {
                normalize_text_node(state, editor, key)
            } else {
                Ok(())
            }
        })?;
    }
    Ok(())
}

pub(crate) fn normalize_text_node(
    state: &mut EditorState,
    editor: &Editor,
    key: NodeKey,
) -> Result<(), EditorError> {
    if !is_mergeable(state, key) {
        return Ok(());
    }
    if is_empty_text(state, key) {
        if !is_pinned(state, editor, key) {
            trace!(%key, "Removing empty text node");
            detach_node(state, editor, key)?;
        }
        return Ok(());
    }

    let mut node = key;
    while let Some(previous) = previous_sibling(state, node).filter(|key| is_mergeable(state, *key)) {
        if is_empty_text(state, previous) && !is_pinned(state, editor, previous) {
            detach_node(state, editor, previous)?;
        } else if can_merge(state, previous, node) {
            node = merge_text_nodes(state, editor, previous, node)?;
            break;
        } else {
            break;
        }
    }

    while let Some(next) = next_sibling(state, node).filter(|key| is_mergeable(state, *key)) {
        if is_empty_text(state, next) && !is_pinned(state, editor, next) {
            detach_node(state, editor, next)?;
        } else if can_merge(state, node, next) {
            node = merge_text_nodes(state, editor, node, next)?;
            break;
        } else {
            break;
        }
    }
    Ok(())
}

fn is_mergeable(state: &EditorState, key: NodeKey) -> bool {
    state.node(key).is_some_and(|node| node.is_simple_text())
}

fn is_empty_text(state: &EditorState, key: NodeKey) -> bool {
    state
        .node(key)
        .and_then(|node| node.as_text())
        .is_some_and(|text| text.text.is_empty())
}

/// Selected or composing nodes survive even when empty
fn is_pinned(state: &EditorState, editor: &Editor, key: NodeKey) -> bool {
    editor.inner.composition_key.get() == Some(key)
        || state
            .selection()
            .is_some_and(|selection| selection.references(key))
}

fn can_merge(state: &EditorState, first: NodeKey, second: NodeKey) -> bool {
    let text = |key| state.node(key).and_then(|node| node.as_text());
    match (text(first), text(second)) {
        (Some(first), Some(second)) => {
            first.format == second.format && first.style == second.style && first.mode == second.mode
        }
        _ => false,
    }
}

/// Append `second` onto `first` and detach `second`; returns `first`
fn merge_text_nodes(
    state: &mut EditorState,
    editor: &Editor,
    first: NodeKey,
    second: NodeKey,
) -> Result<NodeKey, EditorError> {
    let appended = state
        .node(second)
        .and_then(|node| node.as_text())
        .map(|text| text.text.clone())
        .unwrap_or_default();

    mark_node_dirty(editor, state, first)?;
    let mut first_len = 0;
    if let Some(text) = state.node_mut(first).and_then(|node| node.text_mut()) {
        first_len = text.text.chars().count();
        text.text.push_str(&appended);
    }

    if let Some(Selection::Range(range)) = state.selection.as_mut() {
        let mut moved = false;
        for point in [&mut range.anchor, &mut range.focus] {
            if point.key == second && point.kind == PointKind::Text {
                point.key = first;
                point.offset += first_len;
                moved = true;
            }
        }
        if moved {
            range.dirty = true;
        }
    }

    let composition_key = &editor.inner.composition_key;
    if composition_key.get() == Some(second) {
        composition_key.set(Some(first));
    }

    {
        let mut dirty = editor.inner.dirty.borrow_mut();
        dirty.normalized.insert(first);
        dirty.normalized.insert(second);
    }
    detach_node(state, editor, second)?;
    trace!(%first, %second, "Merged text nodes");
    Ok(first)
}
