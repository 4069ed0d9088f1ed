//! # Transform Convergence
//!
//! Re-runs registered node transforms over dirty nodes until a pass produces
//! no new dirty nodes.
//!
//! ## Passes
//!
//! 1. **Leaves**: take the dirty-leaf set, normalize each simple text node,
//!    then run its type's transforms. Repeat while the pass produced new
//!    dirty leaves.
//! 2. **Elements**: take the dirty-element map with the root moved last and
//!    run transforms for every intentionally dirty element (the root always
//!    runs). If anything became dirty, go back to 1.
//!
//! Every processed key is kept in a permanent set so the renderer still sees
//! the whole cycle's dirtiness afterwards.
//!
//! The iteration counter lives on the editor; once it passes
//! [`MAX_TRANSFORM_ITERATIONS`] both this loop and every further dirty-mark
//! fail with [`EditorError::InfiniteTransformLoop`].

use crate::context;
use crate::editor::Editor;
use crate::errors::EditorError;
use crate::node::NodeKey;
use crate::normalize;
use crate::registry::NodeTransform;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, instrument};

pub(crate) const MAX_TRANSFORM_ITERATIONS: u32 = 99;

type TransformCache = HashMap<String, Vec<NodeTransform>>;

#[instrument(skip_all, fields(namespace = %editor.inner.namespace))]
pub(crate) fn apply_all_transforms(editor: &Editor) -> Result<(), EditorError> {
    let inner = &editor.inner;
    let composition_key = inner.composition_key.get();
    let mut cache = TransformCache::new();
    let mut all_leaves: IndexSet<NodeKey> = IndexSet::new();
    let mut all_elements: IndexMap<NodeKey, bool> = IndexMap::new();

    let result = loop {
        if let Err(error) = check_iterations(editor) {
            break Err(error);
        }

        // Leaves first: a dirty leaf always dirties its ancestors too
        let leaves = std::mem::take(&mut inner.dirty.borrow_mut().leaves);
        if !leaves.is_empty() {
            if let Err(error) = transform_leaves(editor, &leaves, composition_key, &mut cache) {
                break Err(error);
            }
            all_leaves.extend(leaves);
            if !inner.dirty.borrow().leaves.is_empty() {
                bump_iterations(editor);
                continue;
            }
        }

        let mut elements = std::mem::take(&mut inner.dirty.borrow_mut().elements);
        if elements.is_empty() {
            break Ok(());
        }
        if let Some(intentional) = elements.shift_remove(&NodeKey::ROOT) {
            elements.insert(NodeKey::ROOT, intentional);
        }

        if let Err(error) = transform_elements(editor, &elements, composition_key, &mut cache) {
            break Err(error);
        }
        for (key, intentional) in elements {
            *all_elements.entry(key).or_insert(false) |= intentional;
        }
        bump_iterations(editor);

        let dirty = inner.dirty.borrow();
        if dirty.leaves.is_empty() && dirty.elements.is_empty() {
            break Ok(());
        }
    };

    let mut dirty = inner.dirty.borrow_mut();
    let leftover_leaves = std::mem::take(&mut dirty.leaves);
    let leftover_elements = std::mem::take(&mut dirty.elements);
    all_leaves.extend(leftover_leaves);
    for (key, intentional) in leftover_elements {
        *all_elements.entry(key).or_insert(false) |= intentional;
    }
    dirty.leaves = all_leaves;
    dirty.elements = all_elements;

    debug!(
        iterations = inner.transform_iterations.get(),
        leaves = dirty.leaves.len(),
        elements = dirty.elements.len(),
        "Transforms converged"
    );
    result
}

fn transform_leaves(
    editor: &Editor,
    leaves: &IndexSet<NodeKey>,
    composition_key: Option<NodeKey>,
    cache: &mut TransformCache,
) -> Result<(), EditorError> {
    for &key in leaves {
        // The composing node is left alone until composition ends
        if composition_key == Some(key) {
            continue;
        }
        let normalizable = context::read_active_state(|state| {
            state.node(key).is_some_and(|node| node.is_simple_text()) && state.is_attached(key)
        })?;
        if normalizable {
            context::write_active_state(|state, editor| {
                normalize::normalize_text_node(state, editor, key)
            })?;
        }
        if let Some(node_type) = transform_target(key, composition_key)? {
            apply_transforms(editor, key, &node_type, cache)?;
        }
    }
    Ok(())
}

fn transform_elements(
    editor: &Editor,
    elements: &IndexMap<NodeKey, bool>,
    composition_key: Option<NodeKey>,
    cache: &mut TransformCache,
) -> Result<(), EditorError> {
    for (&key, &intentional) in elements {
        // Ancestor-only dirtiness does not trigger transforms
        if !key.is_root() && !intentional {
            continue;
        }
        if let Some(node_type) = transform_target(key, composition_key)? {
            apply_transforms(editor, key, &node_type, cache)?;
        }
    }
    Ok(())
}

/// Type name of `key` if it exists, is attached and is not being composed
fn transform_target(
    key: NodeKey,
    composition_key: Option<NodeKey>,
) -> Result<Option<String>, EditorError> {
    if composition_key == Some(key) {
        return Ok(None);
    }
    context::read_active_state(|state| {
        state
            .node(key)
            .filter(|_| state.is_attached(key))
            .map(|node| node.node_type().to_string())
    })
}

/// Run the transforms registered for `node_type` on `key`, in order, until
/// one of them detaches the node
fn apply_transforms(
    editor: &Editor,
    key: NodeKey,
    node_type: &str,
    cache: &mut TransformCache,
) -> Result<(), EditorError> {
    if !cache.contains_key(node_type) {
        let transforms = editor.inner.registry.borrow().transforms(node_type)?;
        cache.insert(node_type.to_string(), transforms);
    }
    let Some(transforms) = cache.get(node_type) else {
        return Ok(());
    };

    for transform in transforms {
        transform(key)?;
        let attached = context::read_active_state(|state| state.is_attached(key))?;
        if !attached {
            break;
        }
    }
    Ok(())
}

fn check_iterations(editor: &Editor) -> Result<(), EditorError> {
    if editor.inner.transform_iterations.get() > MAX_TRANSFORM_ITERATIONS {
        return Err(EditorError::InfiniteTransformLoop);
    }
    Ok(())
}

fn bump_iterations(editor: &Editor) {
    let iterations = &editor.inner.transform_iterations;
    iterations.set(iterations.get() + 1);
}
