//! # Active Context
//!
//! Node APIs locate "the document currently being edited" through a single
//! thread-confined active frame instead of explicit parameters.
//!
//! Entering a scope swaps the frame in and returns a [`ContextGuard`]; dropping
//! the guard restores whatever was active before, on normal return, early `?`
//! return and unwinding alike. Nested scopes nest by saving and restoring, so
//! only one frame is ever active.

use crate::editor::Editor;
use crate::errors::EditorError;
use crate::state::EditorState;
use std::cell::RefCell;
use std::rc::Rc;

/// Which snapshot the active frame points at
#[derive(Clone)]
pub(crate) enum ActiveState {
    /// The editor's pending (writable) state
    Pending,
    /// A specific snapshot, typically frozen
    Snapshot(Rc<EditorState>),
}

#[derive(Clone)]
struct ActiveFrame {
    editor: Editor,
    state: ActiveState,
    read_only: bool,
}

thread_local! {
    static ACTIVE: RefCell<Option<ActiveFrame>> = const { RefCell::new(None) };
}

/// Restores the previously active frame on drop
pub(crate) struct ContextGuard {
    previous: Option<ActiveFrame>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| *active.borrow_mut() = previous);
    }
}

pub(crate) fn enter(editor: &Editor, state: ActiveState, read_only: bool) -> ContextGuard {
    let frame = ActiveFrame {
        editor: editor.clone(),
        state,
        read_only,
    };
    let previous = ACTIVE.with(|active| active.replace(Some(frame)));
    ContextGuard { previous }
}

/// Run `f` with `editor` and `snapshot` active.
///
/// `None` selects the editor's pending state. The previous frame is restored
/// on every exit path.
pub fn with_active_context<R>(
    editor: &Editor,
    snapshot: Option<Rc<EditorState>>,
    read_only: bool,
    f: impl FnOnce() -> R,
) -> R {
    let state = match snapshot {
        Some(snapshot) => ActiveState::Snapshot(snapshot),
        None => ActiveState::Pending,
    };
    let _guard = enter(editor, state, read_only);
    f()
}

fn current_frame() -> Result<ActiveFrame, EditorError> {
    ACTIVE
        .with(|active| active.borrow().clone())
        .ok_or(EditorError::NoActiveContext)
}

/// Editor owning the active scope
pub fn active_editor() -> Result<Editor, EditorError> {
    current_frame().map(|frame| frame.editor)
}

pub(crate) fn is_active_editor(editor: &Editor) -> bool {
    ACTIVE.with(|active| {
        active
            .borrow()
            .as_ref()
            .is_some_and(|frame| frame.editor == *editor)
    })
}

/// True when writes would be rejected: read-only scope, frozen snapshot or no scope at all
pub fn is_read_only() -> bool {
    match current_frame() {
        Ok(frame) => match &frame.state {
            ActiveState::Snapshot(state) => frame.read_only || state.is_frozen(),
            ActiveState::Pending => {
                frame.read_only
                    || frame
                        .editor
                        .inner
                        .pending
                        .borrow()
                        .as_ref()
                        .map_or(true, |state| state.is_frozen())
            }
        },
        Err(_) => true,
    }
}

/// Read the active snapshot
pub fn read_active_state<R>(f: impl FnOnce(&EditorState) -> R) -> Result<R, EditorError> {
    let frame = current_frame()?;
    match frame.state {
        ActiveState::Snapshot(state) => Ok(f(&state)),
        ActiveState::Pending => {
            let pending = frame.editor.inner.pending.borrow();
            match pending.as_ref() {
                Some(state) => Ok(f(state)),
                None => Ok(f(&frame.editor.editor_state())),
            }
        }
    }
}

/// Mutate the active pending snapshot.
///
/// `f` must not re-enter the active context; it receives the state and the
/// owning editor directly.
pub(crate) fn write_active_state<R>(
    f: impl FnOnce(&mut EditorState, &Editor) -> Result<R, EditorError>,
) -> Result<R, EditorError> {
    let frame = current_frame()?;
    if let ActiveState::Snapshot(state) = &frame.state {
        return Err(if state.is_frozen() {
            EditorError::FrozenSnapshot
        } else {
            EditorError::ReadOnly
        });
    }
    if frame.read_only {
        return Err(EditorError::ReadOnly);
    }

    let editor = frame.editor;
    let mut pending = editor.inner.pending.borrow_mut();
    let state = pending.as_mut().ok_or(EditorError::FrozenSnapshot)?;
    if state.is_frozen() {
        return Err(EditorError::FrozenSnapshot);
    }
    f(Rc::make_mut(state), &editor)
}
