//! Removes nodes that ended an update cycle detached from the root.
//!
//! Only dirty nodes can have been detached, so the dirty sets drive the walk.
//! A detached element takes the descendants that still point at it along.
//! Keys that never existed in the previous snapshot are also dropped from the
//! dirty sets so the renderer never hears about them.

use crate::editor::Editor;
use crate::node::NodeKey;
use crate::state::EditorState;
use std::rc::Rc;
use tracing::debug;

pub(crate) fn collect_detached_nodes(editor: &Editor, prev: &EditorState) {
    let inner = &editor.inner;
    let mut pending = inner.pending.borrow_mut();
    let Some(state) = pending.as_mut() else {
        return;
    };
    let mut dirty = inner.dirty.borrow_mut();

    let mut doomed = Vec::new();
    let detached_elements: Vec<NodeKey> = dirty
        .elements
        .keys()
        .copied()
        .filter(|key| state.contains(*key) && !state.is_attached(*key))
        .collect();
    for key in detached_elements {
        collect_descendants(state, key, &mut doomed);
        doomed.push(key);
    }
    let detached_leaves = dirty
        .leaves
        .iter()
        .copied()
        .filter(|key| state.contains(*key) && !state.is_attached(*key));
    doomed.extend(detached_leaves);

    if doomed.is_empty() {
        return;
    }

    let state = Rc::make_mut(state);
    for key in &doomed {
        if !prev.contains(*key) {
            dirty.elements.shift_remove(key);
            dirty.leaves.shift_remove(key);
        }
        state.remove_node(*key);
    }
    debug!(collected = doomed.len(), "Collected detached nodes");
}

fn collect_descendants(state: &EditorState, parent: NodeKey, out: &mut Vec<NodeKey>) {
    let Some(node) = state.node(parent) else {
        return;
    };
    for &child in node.children() {
        // A child moved elsewhere this cycle keeps living
        let owned = state
            .node(child)
            .is_some_and(|node| node.parent() == Some(parent));
        if owned {
            collect_descendants(state, child, out);
            out.push(child);
        }
    }
}

/// Drop published decorations whose node no longer exists in `next`
pub(crate) fn collect_detached_decorators(editor: &Editor, next: &EditorState) {
    let inner = &editor.inner;
    let mut pending = inner.pending_decorators.borrow_mut();
    let stale: Vec<NodeKey> = match pending.as_ref() {
        Some(decorators) => decorators.keys().copied().filter(|key| !next.contains(*key)).collect(),
        None => inner
            .decorators
            .borrow()
            .keys()
            .copied()
            .filter(|key| !next.contains(*key))
            .collect(),
    };
    if stale.is_empty() {
        return;
    }

    let decorators = pending.get_or_insert_with(|| (**inner.decorators.borrow()).clone());
    for key in stale {
        decorators.remove(&key);
    }
}
