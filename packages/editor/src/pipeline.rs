//! # Commit Pipeline
//!
//! Publishes the pending snapshot as the editor's current one:
//!
//! ```text
//! take pending → freeze → swap into current
//!   → reconcile (rendering editors with dirty nodes)
//!   → decorators → external selection → mutation listeners
//!   → SELECTION_CHANGE (non-range selections) → decorator listeners
//!   → text content listeners → update listeners → deferred callbacks
//!   → next queued update
//! ```
//!
//! ## Render failures
//!
//! If the renderer fails, its bindings are dropped and the last good snapshot
//! is replayed against an empty view with a full reconcile. A second failure
//! is returned to the caller; the current snapshot is then the last good one.

use crate::commands::SELECTION_CHANGE_COMMAND;
use crate::context::{self, ActiveState};
use crate::dirty::{DirtyTracker, DirtyType};
use crate::editor::{frozen_empty_state, Editor};
use crate::errors::EditorError;
use crate::gc;
use crate::listeners::{self, MutationPayload, UpdatePayload};
use crate::node::{NodeData, NodeKey};
use crate::render::{MutatedNodes, ReconcileContext, RenderError};
use crate::state::EditorState;
use crate::update::{self, SKIP_SELECTION_SYNC_TAG};
use std::rc::Rc;
use tracing::{debug, instrument, warn};

/// Whether this commit is the first try or the replay after a render failure
#[derive(Debug, Clone)]
pub(crate) enum CommitAttempt {
    Initial,
    Recovery { previous: Rc<EditorState> },
}

#[instrument(skip_all, fields(namespace = %editor.inner.namespace))]
pub(crate) fn commit_pending_updates(
    editor: &Editor,
    attempt: CommitAttempt,
) -> Result<(), EditorError> {
    let inner = &editor.inner;
    let taken = inner.pending.borrow_mut().take();
    let Some(mut pending) = taken else {
        return Ok(());
    };

    let needs_update = inner.dirty.borrow().dirty_type != DirtyType::NoDirtyNodes;
    if !pending.is_frozen() {
        Rc::make_mut(&mut pending).freeze();
    }
    let previous = inner.current.replace(Rc::clone(&pending));
    let rendering = editor.is_rendering();

    let mut mutated = None;
    if rendering && needs_update {
        match reconcile(editor, &previous, &pending) {
            Ok(reported) => mutated = reported,
            Err(error) => return recover(editor, attempt, previous, error),
        }
    }

    let dirty = std::mem::take(&mut *inner.dirty.borrow_mut());
    let tags = std::mem::take(&mut *inner.tags.borrow_mut());
    let deferred = std::mem::take(&mut *inner.deferred.borrow_mut());

    // A replay compares against the last good snapshot, not the empty placeholder
    let baseline = match &attempt {
        CommitAttempt::Recovery { previous } => previous,
        CommitAttempt::Initial => &previous,
    };

    if needs_update {
        compute_decorators(editor, &pending, &dirty);
    }
    gc::collect_detached_decorators(editor, &pending);

    let next_selection = pending.selection();
    let prev_selection = baseline.selection();
    let selection_changed =
        next_selection.is_none() || next_selection.is_some_and(|selection| selection.is_dirty());
    if rendering
        && editor.is_editable()
        && (needs_update || selection_changed)
        && !tags.contains(SKIP_SELECTION_SYNC_TAG)
    {
        let _updating = editor.mark_updating(true);
        inner.selection_adapter.sync_external_selection(
            prev_selection,
            next_selection,
            editor,
            &tags,
            pending.len(),
        );
    }

    if let Some(mutated) = mutated {
        let payload = MutationPayload {
            update_tags: &tags,
            dirty_leaves: &dirty.leaves,
            prev_editor_state: baseline,
        };
        listeners::trigger_mutation_listeners(editor, &mutated, &payload);
    }

    if let Some(next) = next_selection.filter(|selection| !selection.is_range()) {
        let changed = !prev_selection.is_some_and(|prev| prev.is(next));
        if changed {
            if let Err(error) = editor.dispatch_command(SELECTION_CHANGE_COMMAND, ()) {
                editor.report_error(&error);
            }
        }
    }

    let published = inner.pending_decorators.borrow_mut().take();
    if let Some(decorators) = published {
        let decorators = Rc::new(decorators);
        *inner.decorators.borrow_mut() = Rc::clone(&decorators);
        listeners::trigger_listeners(editor, &inner.listeners.decorator, true, |listener| {
            listener(&decorators)
        });
    }

    if !inner.listeners.text_content.is_empty() {
        let after = pending.text_content();
        if baseline.text_content() != after {
            listeners::trigger_listeners(editor, &inner.listeners.text_content, true, |listener| {
                listener(&after)
            });
        }
    }

    let payload = UpdatePayload {
        editor_state: &pending,
        prev_editor_state: baseline,
        dirty_elements: &dirty.elements,
        dirty_leaves: &dirty.leaves,
        normalized_nodes: &dirty.normalized,
        tags: &tags,
    };
    listeners::trigger_listeners(editor, &inner.listeners.update, false, |listener| {
        listener(&payload)
    });

    if !deferred.is_empty() {
        let _updating = editor.mark_updating(true);
        for callback in deferred {
            callback();
        }
    }

    debug!(
        nodes = pending.len(),
        dirty_leaves = dirty.leaves.len(),
        dirty_elements = dirty.elements.len(),
        tags = ?tags,
        "Committed"
    );

    let queued = inner.queue.borrow_mut().pop_front();
    if let Some((f, options)) = queued {
        update::begin_update(editor, f, options)?;
    }
    Ok(())
}

/// Run the renderer against `next` inside a read-only scope
fn reconcile(
    editor: &Editor,
    prev: &EditorState,
    next: &Rc<EditorState>,
) -> Result<Option<MutatedNodes>, RenderError> {
    let inner = &editor.inner;
    let _updating = editor.mark_updating(true);
    let _guard = context::enter(editor, ActiveState::Snapshot(Rc::clone(next)), true);

    let dirty = inner.dirty.borrow();
    let mut renderer = inner.renderer.borrow_mut();
    let Some(renderer) = renderer.as_mut() else {
        return Ok(None);
    };
    let mut elements = inner.elements.borrow_mut();
    let result = renderer.reconcile(ReconcileContext {
        prev,
        next,
        dirty_type: dirty.dirty_type,
        dirty_elements: &dirty.elements,
        dirty_leaves: &dirty.leaves,
        elements: &mut elements,
    });
    result
}

/// Reset the view and replay `previous`, or give up if this already was the replay
fn recover(
    editor: &Editor,
    attempt: CommitAttempt,
    previous: Rc<EditorState>,
    error: RenderError,
) -> Result<(), EditorError> {
    let inner = &editor.inner;
    let error = EditorError::from(error);
    editor.report_error(&error);
    if let CommitAttempt::Recovery { .. } = attempt {
        warn!(%error, "Replaying the last good snapshot failed");
        inner.tags.borrow_mut().clear();
        inner.deferred.borrow_mut().clear();
        inner.dirty.borrow_mut().reset();
        return Err(error);
    }

    warn!(%error, "Render failed, replaying the last good snapshot");
    inner.elements.borrow_mut().clear();
    if let Some(renderer) = inner.renderer.borrow_mut().as_mut() {
        renderer.reset();
    }
    *inner.current.borrow_mut() = Rc::new(frozen_empty_state());
    *inner.pending.borrow_mut() = Some(Rc::clone(&previous));
    inner.composition_key.set(None);
    {
        let mut dirty = inner.dirty.borrow_mut();
        dirty.reset();
        dirty.dirty_type = DirtyType::FullReconcile;
        dirty.elements.insert(NodeKey::ROOT, true);
    }
    commit_pending_updates(editor, CommitAttempt::Recovery { previous })
}

/// Stage decorations for dirty decorator nodes (every one on a full reconcile)
fn compute_decorators(editor: &Editor, state: &EditorState, dirty: &DirtyTracker) {
    let inner = &editor.inner;
    let keys: Vec<NodeKey> = match dirty.dirty_type {
        DirtyType::FullReconcile => state.nodes().map(|node| node.key()).collect(),
        _ => dirty.leaves.iter().copied().collect(),
    };

    let registry = inner.registry.borrow();
    let current = Rc::clone(&inner.decorators.borrow());
    let mut pending = inner.pending_decorators.borrow_mut();
    for key in keys {
        let Some(node) = state.node(key) else {
            continue;
        };
        if !matches!(node.data(), NodeData::Decorator(_)) {
            continue;
        }
        let Some(decoration) = registry
            .get(node.node_type())
            .ok()
            .and_then(|class| class.decorate(node))
        else {
            continue;
        };
        let published = pending.as_ref().unwrap_or(&*current);
        if published.get(&key) != Some(&decoration) {
            pending
                .get_or_insert_with(|| (*current).clone())
                .insert(key, decoration);
        }
    }
}
