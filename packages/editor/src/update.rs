//! # Update Scheduler
//!
//! Turns a mutation callback into changes on the pending snapshot and decides
//! when that snapshot is committed.
//!
//! ## Cycle
//!
//! ```text
//! begin_update(f)
//!   ├─ clone current → pending (if none, or the pending one is frozen)
//!   ├─ seed selection (headless: copy; otherwise ask the SelectionAdapter)
//!   ├─ f()
//!   ├─ drain queued updates inline (FIFO)
//!   ├─ selection transforms
//!   ├─ transforms to a fixed point (or text normalization only)
//!   ├─ drain the queue again, collect detached nodes
//!   ├─ validate selection
//!   └─ commit now (flush-sync) │ schedule on the TaskQueue │ discard no-op
//! ```
//!
//! Any error inside the cycle is reported, and the editor commits the
//! pre-cycle snapshot with a full reconcile instead.

use crate::context::{self, ActiveState};
use crate::dirty::DirtyType;
use crate::editor::Editor;
use crate::errors::EditorError;
use crate::gc;
use crate::normalize;
use crate::pipeline::{self, CommitAttempt};
use crate::selection::{InputEvent, PointKind, Selection};
use crate::state::EditorState;
use crate::transforms;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Tag for updates that should be folded into the previous history entry
pub const HISTORY_MERGE_TAG: &str = "history-merge";

/// Tag that suppresses publishing the selection to the host
pub const SKIP_SELECTION_SYNC_TAG: &str = "skip-dom-selection";

pub(crate) type UpdateFn = Box<dyn FnOnce() -> Result<(), EditorError>>;
pub(crate) type QueuedUpdate = (UpdateFn, Option<UpdateOptions>);

/// Per-update options
#[derive(Default)]
pub struct UpdateOptions {
    pub(crate) tags: HashSet<String>,
    pub(crate) on_update: Option<Box<dyn FnOnce()>>,
    pub(crate) skip_transforms: bool,
    pub(crate) discrete: bool,
    pub(crate) event: Option<InputEvent>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Callback run after the commit that includes this update
    pub fn on_update(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }

    /// Only normalize dirty text; registered transforms do not run
    pub fn skip_transforms(mut self) -> Self {
        self.skip_transforms = true;
        self
    }

    /// Commit synchronously instead of on the task queue
    pub fn discrete(mut self) -> Self {
        self.discrete = true;
        self
    }

    pub fn event(mut self, event: InputEvent) -> Self {
        self.event = Some(event);
        self
    }
}

impl fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("tags", &self.tags)
            .field("has_on_update", &self.on_update.is_some())
            .field("skip_transforms", &self.skip_transforms)
            .field("discrete", &self.discrete)
            .field("event", &self.event)
            .finish()
    }
}

/// Tag the update in progress
pub fn add_update_tag(tag: impl Into<String>) -> Result<(), EditorError> {
    let editor = context::active_editor()?;
    editor.inner.tags.borrow_mut().insert(tag.into());
    Ok(())
}

pub fn has_update_tag(tag: &str) -> Result<bool, EditorError> {
    let editor = context::active_editor()?;
    let has_tag = editor.inner.tags.borrow().contains(tag);
    Ok(has_tag)
}

/// Enqueue while an update is running, otherwise start a cycle
pub(crate) fn update_editor(
    editor: &Editor,
    f: UpdateFn,
    options: Option<UpdateOptions>,
) -> Result<(), EditorError> {
    if editor.is_updating() {
        editor.inner.queue.borrow_mut().push_back((f, options));
        debug!(
            queued = editor.inner.queue.borrow().len(),
            "Update queued behind running update"
        );
        return Ok(());
    }
    begin_update(editor, f, options)
}

/// Run inline if `editor` is already the active one, otherwise start a cycle
pub(crate) fn update_editor_sync<F>(
    editor: &Editor,
    f: F,
    options: Option<UpdateOptions>,
) -> Result<(), EditorError>
where
    F: FnOnce() -> Result<(), EditorError>,
{
    if options.is_none() && context::is_active_editor(editor) {
        return f();
    }
    begin_update(editor, f, options)
}

pub(crate) fn begin_update<F>(
    editor: &Editor,
    f: F,
    options: Option<UpdateOptions>,
) -> Result<(), EditorError>
where
    F: FnOnce() -> Result<(), EditorError>,
{
    let inner = &editor.inner;
    let mut skip_transforms = false;
    let mut discrete = false;
    let mut event = None;
    if let Some(options) = options {
        skip_transforms = options.skip_transforms;
        discrete = options.discrete;
        event = options.event;
        inner.tags.borrow_mut().extend(options.tags);
        if let Some(on_update) = options.on_update {
            inner.deferred.borrow_mut().push(on_update);
        }
    }

    let current = editor.editor_state();
    let cloned = {
        let mut pending = inner.pending.borrow_mut();
        let needs_clone = pending.as_ref().map_or(true, |state| state.is_frozen());
        if needs_clone {
            if pending.is_none() {
                inner.dirty.borrow_mut().reset();
            }
            let base = pending.as_deref().unwrap_or(current.as_ref());
            let next = Rc::new(base.clone_for_update());
            *pending = Some(next);
        }
        if discrete {
            if let Some(state) = pending.as_mut() {
                Rc::make_mut(state).flush_sync = true;
            }
        }
        needs_clone
    };
    debug!(namespace = %inner.namespace, cloned, "Update cycle started");

    let result = {
        let _updating = editor.mark_updating(true);
        let _guard = context::enter(editor, ActiveState::Pending, false);
        let result = run_update_cycle(editor, f, cloned, event.as_ref(), skip_transforms, &current);
        inner.transform_iterations.set(0);
        result
    };

    if let Err(error) = result {
        editor.report_error(&error);
        *inner.pending.borrow_mut() = Some(Rc::clone(&current));
        {
            let mut dirty = inner.dirty.borrow_mut();
            dirty.reset();
            dirty.dirty_type = DirtyType::FullReconcile;
        }
        return pipeline::commit_pending_updates(editor, CommitAttempt::Initial);
    }

    let should_update = inner.dirty.borrow().dirty_type != DirtyType::NoDirtyNodes
        || !inner.deferred.borrow().is_empty()
        || has_dirty_selection(editor);

    let flush_sync = take_flush_sync(editor);
    if should_update {
        if flush_sync {
            return pipeline::commit_pending_updates(editor, CommitAttempt::Initial);
        }
        if cloned {
            let weak = editor.downgrade();
            inner.tasks.schedule(move || match weak.upgrade() {
                Some(editor) => pipeline::commit_pending_updates(&editor, CommitAttempt::Initial),
                None => Ok(()),
            });
            debug!(namespace = %inner.namespace, "Commit scheduled");
        }
    } else if cloned {
        inner.tags.borrow_mut().clear();
        inner.deferred.borrow_mut().clear();
        *inner.pending.borrow_mut() = None;
        debug!(namespace = %inner.namespace, "No-op update discarded");
    }
    Ok(())
}

fn run_update_cycle<F>(
    editor: &Editor,
    f: F,
    cloned: bool,
    event: Option<&InputEvent>,
    skip_transforms: bool,
    current: &Rc<EditorState>,
) -> Result<(), EditorError>
where
    F: FnOnce() -> Result<(), EditorError>,
{
    let inner = &editor.inner;
    if cloned {
        let selection = if inner.headless {
            current.selection().map(Selection::clone_clean)
        } else {
            inner.selection_adapter.create_selection(editor, event)
        };
        if let Some(state) = inner.pending.borrow_mut().as_mut() {
            Rc::make_mut(state).selection = selection;
        }
    }

    let starting_composition = inner.composition_key.get();
    f()?;
    let skip_transforms = process_nested_updates(editor, skip_transforms)?;
    apply_selection_transforms(editor, current)?;

    if inner.dirty.borrow().dirty_type != DirtyType::NoDirtyNodes {
        if skip_transforms {
            normalize::normalize_all_dirty_text_nodes(editor)?;
        } else {
            transforms::apply_all_transforms(editor)?;
        }
        process_nested_updates(editor, false)?;
        gc::collect_detached_nodes(editor, current);
    }

    if inner.composition_key.get() != starting_composition {
        set_flush_sync(editor);
    }

    validate_selection(editor)
}

/// Run every queued update inline against the pending snapshot.
///
/// Returns whether any of them asked to skip transforms.
fn process_nested_updates(editor: &Editor, skip_transforms: bool) -> Result<bool, EditorError> {
    let inner = &editor.inner;
    let mut skip_transforms = skip_transforms;
    loop {
        let next = inner.queue.borrow_mut().pop_front();
        let Some((f, options)) = next else {
            break;
        };
        if let Some(options) = options {
            skip_transforms |= options.skip_transforms;
            if options.discrete {
                set_flush_sync(editor);
            }
            if let Some(on_update) = options.on_update {
                inner.deferred.borrow_mut().push(on_update);
            }
            inner.tags.borrow_mut().extend(options.tags);
        }
        f()?;
    }
    Ok(skip_transforms)
}

/// Let text node classes adjust a range selection that lands on them
fn apply_selection_transforms(editor: &Editor, current: &EditorState) -> Result<(), EditorError> {
    let range = context::read_active_state(|state| match state.selection() {
        Some(Selection::Range(range)) => Some(range.clone()),
        _ => None,
    })?;
    let Some(mut range) = range else {
        return Ok(());
    };

    let mut targets = Vec::with_capacity(2);
    if range.anchor.kind == PointKind::Text {
        targets.push(range.anchor.key);
    }
    if range.focus.kind == PointKind::Text && !targets.contains(&range.focus.key) {
        targets.push(range.focus.key);
    }

    let before = range.clone();
    for key in targets {
        let node_type = context::read_active_state(|state| {
            state.node(key).map(|node| node.node_type().to_string())
        })?;
        let Some(node_type) = node_type else {
            continue;
        };
        let transform = editor
            .inner
            .registry
            .borrow()
            .get(&node_type)?
            .selection_transform()
            .cloned();
        if let Some(transform) = transform {
            transform(key, current.selection(), &mut range)?;
        }
    }

    if range != before {
        range.dirty = true;
        context::write_active_state(|state, _| {
            state.selection = Some(Selection::Range(range));
            Ok(())
        })?;
    }
    Ok(())
}

/// A range selection must still resolve; an emptied node selection becomes none
fn validate_selection(editor: &Editor) -> Result<(), EditorError> {
    let mut pending = editor.inner.pending.borrow_mut();
    let Some(state) = pending.as_mut() else {
        return Ok(());
    };
    let (lost, emptied) = match state.selection() {
        Some(Selection::Range(range)) => (
            !state.contains(range.anchor.key) || !state.contains(range.focus.key),
            false,
        ),
        Some(Selection::Node(nodes)) => (false, nodes.is_empty()),
        None => (false, false),
    };
    if lost {
        return Err(EditorError::SelectionLost);
    }
    if emptied {
        Rc::make_mut(state).selection = None;
    }
    Ok(())
}

fn has_dirty_selection(editor: &Editor) -> bool {
    let current = editor.editor_state();
    let pending = editor.inner.pending.borrow();
    let Some(pending) = pending.as_ref() else {
        return false;
    };
    match (pending.selection(), current.selection()) {
        (Some(next), previous) => next.is_dirty() || !previous.is_some_and(|previous| next.is(previous)),
        (None, Some(_)) => true,
        (None, None) => false,
    }
}

fn set_flush_sync(editor: &Editor) {
    if let Some(state) = editor.inner.pending.borrow_mut().as_mut() {
        Rc::make_mut(state).flush_sync = true;
    }
}

/// Read and clear the pending snapshot's flush-sync flag
fn take_flush_sync(editor: &Editor) -> bool {
    let mut pending = editor.inner.pending.borrow_mut();
    match pending.as_mut() {
        Some(state) if state.flush_sync => {
            Rc::make_mut(state).flush_sync = false;
            true
        }
        _ => false,
    }
}
