//! # Editor
//!
//! The long-lived owner of a document. An [`Editor`] is a cheap handle
//! (`Rc`) to shared single-threaded state:
//!
//! - the committed snapshot and at most one pending snapshot
//! - the dirty tracker, the queued-update FIFO and the update tags
//! - node registry, listener sets and the command table
//! - the renderer, its key → element bindings and the selection adapter
//!
//! Everything here is confined to one thread; exclusivity comes from the
//! update FIFO and the `updating` flag, never from locks.

use crate::commands::{self, Command, CommandListener, CommandPriority, CommandTable};
use crate::config::EditorConfig;
use crate::dirty::{DirtyTracker, DirtyType};
use crate::errors::EditorError;
use crate::listeners::{
    self, DecoratorListener, EditableListener, ListenerSet, Listeners, MutationListener,
    MutationPayload, Subscription, TextContentListener, UpdateListener, UpdatePayload,
};
use crate::node::NodeKey;
use crate::pipeline::{self, CommitAttempt};
use crate::registry::{NodeClass, NodeRegistry, NodeTransform};
use crate::render::{ElementHandle, NodeMutation, Renderer};
use crate::scheduler::TaskQueue;
use crate::selection::{InputEvent, RetainSelection, SelectionAdapter};
use crate::serialization::{self, SerializedEditorState};
use crate::state::EditorState;
use crate::update::{self, QueuedUpdate, UpdateOptions, HISTORY_MERGE_TAG};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{error, info};

/// Receives every error the editor recovers from
pub type ErrorHandler = Rc<dyn Fn(&EditorError)>;

pub(crate) struct EditorInner {
    pub(crate) namespace: String,
    pub(crate) headless: bool,
    pub(crate) editable: Cell<bool>,

    pub(crate) current: RefCell<Rc<EditorState>>,
    pub(crate) pending: RefCell<Option<Rc<EditorState>>>,
    pub(crate) dirty: RefCell<DirtyTracker>,

    pub(crate) updating: Cell<bool>,
    pub(crate) queue: RefCell<VecDeque<QueuedUpdate>>,
    pub(crate) tags: RefCell<HashSet<String>>,
    pub(crate) deferred: RefCell<Vec<Box<dyn FnOnce()>>>,
    pub(crate) transform_iterations: Cell<u32>,
    pub(crate) composition_key: Cell<Option<NodeKey>>,
    next_key: Cell<u64>,

    pub(crate) registry: RefCell<NodeRegistry>,
    pub(crate) listeners: Listeners,
    pub(crate) commands: RefCell<CommandTable>,

    pub(crate) renderer: RefCell<Option<Box<dyn Renderer>>>,
    pub(crate) elements: RefCell<HashMap<NodeKey, ElementHandle>>,
    pub(crate) selection_adapter: Rc<dyn SelectionAdapter>,
    pub(crate) decorators: RefCell<Rc<HashMap<NodeKey, Value>>>,
    pub(crate) pending_decorators: RefCell<Option<HashMap<NodeKey, Value>>>,

    on_error: ErrorHandler,
    parent: Option<WeakEditor>,
    pub(crate) tasks: TaskQueue,
}

#[derive(Clone)]
pub struct Editor {
    pub(crate) inner: Rc<EditorInner>,
}

/// Non-owning editor handle, used by deferred tasks and child editors
#[derive(Clone)]
pub struct WeakEditor {
    inner: Weak<EditorInner>,
}

impl WeakEditor {
    pub fn upgrade(&self) -> Option<Editor> {
        self.inner.upgrade().map(|inner| Editor { inner })
    }
}

/// Restores the editor's updating flag on drop
pub(crate) struct UpdatingGuard<'a> {
    editor: &'a Editor,
    previous: bool,
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.editor.inner.updating.set(self.previous);
    }
}

impl Editor {
    pub fn builder() -> EditorBuilder {
        EditorBuilder::default()
    }

    pub fn downgrade(&self) -> WeakEditor {
        WeakEditor {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn parent(&self) -> Option<Editor> {
        self.inner.parent.as_ref().and_then(WeakEditor::upgrade)
    }

    /// Outermost ancestor first, this editor last
    pub(crate) fn propagation_chain(&self) -> Vec<Editor> {
        let mut chain = vec![self.clone()];
        let mut parent = self.parent();
        while let Some(editor) = parent {
            parent = editor.parent();
            chain.push(editor);
        }
        chain.reverse();
        chain
    }

    // ---- State -------------------------------------------------------------

    /// The committed snapshot
    pub fn editor_state(&self) -> Rc<EditorState> {
        Rc::clone(&self.inner.current.borrow())
    }

    pub fn has_pending_update(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    pub fn has_dirty_nodes(&self) -> bool {
        self.inner.dirty.borrow().dirty_type() != DirtyType::NoDirtyNodes
    }

    pub fn is_updating(&self) -> bool {
        self.inner.updating.get()
    }

    pub fn composition_key(&self) -> Option<NodeKey> {
        self.inner.composition_key.get()
    }

    pub(crate) fn next_key(&self) -> NodeKey {
        let raw = self.inner.next_key.get();
        self.inner.next_key.set(raw + 1);
        NodeKey::from_raw(raw)
    }

    pub(crate) fn mark_updating(&self, updating: bool) -> UpdatingGuard<'_> {
        let previous = self.inner.updating.replace(updating);
        UpdatingGuard {
            editor: self,
            previous,
        }
    }

    pub fn report_error(&self, error: &EditorError) {
        let on_error = Rc::clone(&self.inner.on_error);
        on_error(error);
    }

    // ---- Updates -----------------------------------------------------------

    /// Queue `f` against the pending snapshot.
    ///
    /// Outside an update the cycle runs immediately and its commit is
    /// deferred to the task queue; inside one, `f` joins the running cycle.
    /// Errors raised by `f` go to the error handler; only an unrecoverable
    /// render failure is returned.
    pub fn update(
        &self,
        f: impl FnOnce() -> Result<(), EditorError> + 'static,
    ) -> Result<(), EditorError> {
        update::update_editor(self, Box::new(f), None)
    }

    pub fn update_with(
        &self,
        f: impl FnOnce() -> Result<(), EditorError> + 'static,
        options: UpdateOptions,
    ) -> Result<(), EditorError> {
        update::update_editor(self, Box::new(f), Some(options))
    }

    /// Update triggered by a host input event, passed on to the selection adapter
    pub fn update_with_event(
        &self,
        event: InputEvent,
        f: impl FnOnce() -> Result<(), EditorError> + 'static,
        options: UpdateOptions,
    ) -> Result<(), EditorError> {
        self.update_with(f, options.event(event))
    }

    /// Like [`update`](Self::update), but runs `f` inline when this editor's
    /// update is already active and never queues
    pub fn update_sync(
        &self,
        f: impl FnOnce() -> Result<(), EditorError>,
        options: Option<UpdateOptions>,
    ) -> Result<(), EditorError> {
        update::update_editor_sync(self, f, options)
    }

    /// Commit any pending update, then run `f` read-only against the result
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> Result<R, EditorError> {
        if !self.is_updating() {
            pipeline::commit_pending_updates(self, CommitAttempt::Initial)?;
        }
        Ok(self.editor_state().read(self, f))
    }

    // ---- Whole-state operations -------------------------------------------

    /// Build a frozen snapshot from `{"root": {...}}` JSON
    pub fn parse_editor_state(&self, json: &str) -> Result<Rc<EditorState>, EditorError> {
        let serialized: SerializedEditorState = serde_json::from_str(json)?;
        self.parse_serialized_state(&serialized)
    }

    pub fn parse_serialized_state(
        &self,
        serialized: &SerializedEditorState,
    ) -> Result<Rc<EditorState>, EditorError> {
        serialization::parse_state(self, serialized).map(Rc::new)
    }

    pub fn export_editor_state(
        &self,
        state: &EditorState,
    ) -> Result<SerializedEditorState, EditorError> {
        serialization::export_state(self, state)
    }

    /// Replace the document wholesale and commit it with a full reconcile
    pub fn set_editor_state(
        &self,
        state: Rc<EditorState>,
        tag: Option<&str>,
    ) -> Result<(), EditorError> {
        if state.is_empty() {
            return Err(EditorError::EmptyEditorState);
        }

        let has_pending_content = self
            .inner
            .pending
            .borrow()
            .as_ref()
            .is_some_and(|pending| !pending.is_empty());
        if has_pending_content {
            if let Some(tag) = tag {
                self.inner.tags.borrow_mut().insert(tag.to_string());
            }
            pipeline::commit_pending_updates(self, CommitAttempt::Initial)?;
        }

        info!(namespace = %self.inner.namespace, nodes = state.len(), "Replacing editor state");
        *self.inner.pending.borrow_mut() = Some(state);
        self.inner.composition_key.set(None);
        {
            let mut dirty = self.inner.dirty.borrow_mut();
            dirty.reset();
            dirty.dirty_type = DirtyType::FullReconcile;
            dirty.elements.insert(NodeKey::ROOT, true);
        }
        if let Some(tag) = tag {
            self.inner.tags.borrow_mut().insert(tag.to_string());
        }
        pipeline::commit_pending_updates(self, CommitAttempt::Initial)
    }

    // ---- Rendering ---------------------------------------------------------

    /// Attach or detach the renderer.
    ///
    /// Attaching drops all element bindings and re-renders the whole
    /// document from scratch.
    pub fn set_renderer(&self, renderer: Option<Box<dyn Renderer>>) -> Result<(), EditorError> {
        let attaching = renderer.is_some();
        *self.inner.renderer.borrow_mut() = renderer;
        self.inner.elements.borrow_mut().clear();

        if !attaching {
            info!(namespace = %self.inner.namespace, "Renderer detached");
            return Ok(());
        }

        let state = {
            let pending = self.inner.pending.borrow();
            pending.clone().unwrap_or_else(|| self.editor_state())
        };
        *self.inner.current.borrow_mut() = Rc::new(frozen_empty_state());
        *self.inner.pending.borrow_mut() = Some(state);
        self.inner.composition_key.set(None);
        {
            let mut dirty = self.inner.dirty.borrow_mut();
            dirty.reset();
            dirty.dirty_type = DirtyType::FullReconcile;
            dirty.elements.insert(NodeKey::ROOT, true);
        }
        {
            let mut tags = self.inner.tags.borrow_mut();
            tags.clear();
            tags.insert(HISTORY_MERGE_TAG.to_string());
        }

        info!(namespace = %self.inner.namespace, "Renderer attached");
        pipeline::commit_pending_updates(self, CommitAttempt::Initial)
    }

    /// Whether commits drive a renderer
    pub fn is_rendering(&self) -> bool {
        !self.inner.headless && self.inner.renderer.borrow().is_some()
    }

    pub fn is_headless(&self) -> bool {
        self.inner.headless
    }

    pub fn element_by_key(&self, key: NodeKey) -> Option<ElementHandle> {
        self.inner.elements.borrow().get(&key).copied()
    }

    /// Decorations published by the last commit
    pub fn decorators(&self) -> Rc<HashMap<NodeKey, Value>> {
        Rc::clone(&self.inner.decorators.borrow())
    }

    pub fn is_editable(&self) -> bool {
        self.inner.editable.get()
    }

    pub fn set_editable(&self, editable: bool) {
        if self.inner.editable.replace(editable) != editable {
            listeners::trigger_listeners(self, &self.inner.listeners.editable, true, |listener| {
                listener(editable)
            });
        }
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.inner.tasks
    }

    // ---- Registration ------------------------------------------------------

    pub fn has_node(&self, type_name: &str) -> bool {
        self.inner.registry.borrow().contains(type_name)
    }

    /// Register `transform` for every node of `type_name`.
    ///
    /// Existing nodes of that type are marked dirty so the transform runs on
    /// them in the next cycle.
    pub fn register_node_transform(
        &self,
        type_name: &str,
        transform: NodeTransform,
    ) -> Result<Subscription, EditorError> {
        self.inner
            .registry
            .borrow_mut()
            .add_transform(type_name, Rc::clone(&transform))?;

        let state = self.editor_state();
        let keys: Vec<NodeKey> = state
            .nodes()
            .filter(|node| node.node_type() == type_name)
            .map(|node| node.key())
            .collect();
        if !keys.is_empty() {
            let options = if self.has_pending_update() {
                UpdateOptions::new()
            } else {
                UpdateOptions::new().tag(HISTORY_MERGE_TAG)
            };
            self.update_with(
                move || {
                    for key in keys {
                        if crate::mutations::get_node_by_key(key)?.is_some() {
                            key.mark_dirty()?;
                        }
                    }
                    Ok(())
                },
                options,
            )?;
        }

        let weak = self.downgrade();
        let type_name = type_name.to_string();
        Ok(Subscription::new(move || {
            if let Some(editor) = weak.upgrade() {
                editor
                    .inner
                    .registry
                    .borrow_mut()
                    .remove_transform(&type_name, &transform);
            }
        }))
    }

    pub fn register_update_listener(
        &self,
        listener: impl Fn(&UpdatePayload<'_>) + 'static,
    ) -> Subscription {
        let listener: UpdateListener = Rc::new(listener);
        self.subscribe(|listeners| &listeners.update, listener)
    }

    pub fn register_text_content_listener(&self, listener: impl Fn(&str) + 'static) -> Subscription {
        let listener: TextContentListener = Rc::new(listener);
        self.subscribe(|listeners| &listeners.text_content, listener)
    }

    pub fn register_decorator_listener(
        &self,
        listener: impl Fn(&HashMap<NodeKey, Value>) + 'static,
    ) -> Subscription {
        let listener: DecoratorListener = Rc::new(listener);
        self.subscribe(|listeners| &listeners.decorator, listener)
    }

    pub fn register_editable_listener(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        let listener: EditableListener = Rc::new(listener);
        self.subscribe(|listeners| &listeners.editable, listener)
    }

    /// Observe renderer-reported mutations of one node type
    pub fn register_mutation_listener(
        &self,
        type_name: &str,
        listener: impl Fn(&HashMap<NodeKey, NodeMutation>, &MutationPayload<'_>) + 'static,
    ) -> Result<Subscription, EditorError> {
        self.inner.registry.borrow().get(type_name)?;
        let listener: MutationListener = Rc::new(listener);
        Ok(self.subscribe(
            |listeners| &listeners.mutation,
            (type_name.to_string(), listener),
        ))
    }

    fn subscribe<L: Clone + 'static>(
        &self,
        select: fn(&Listeners) -> &ListenerSet<L>,
        listener: L,
    ) -> Subscription {
        let id = select(&self.inner.listeners).add(listener);
        let weak = self.downgrade();
        Subscription::new(move || {
            if let Some(editor) = weak.upgrade() {
                select(&editor.inner.listeners).remove(id);
            }
        })
    }

    /// Register a command listener at `priority`; registering the same `Rc`
    /// twice at the same priority is a no-op
    pub fn register_command<P: 'static>(
        &self,
        command: Command<P>,
        listener: CommandListener<P>,
        priority: CommandPriority,
    ) -> Subscription {
        self.inner
            .commands
            .borrow_mut()
            .register(command, Rc::clone(&listener), priority);

        let weak = self.downgrade();
        Subscription::new(move || {
            if let Some(editor) = weak.upgrade() {
                editor
                    .inner
                    .commands
                    .borrow_mut()
                    .unregister(command, &listener, priority);
            }
        })
    }

    /// Run the listeners for `command`, returning whether one handled it
    pub fn dispatch_command<P: 'static>(
        &self,
        command: Command<P>,
        payload: P,
    ) -> Result<bool, EditorError> {
        commands::dispatch_command(self, command, payload)
    }
}

impl PartialEq for Editor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Editor {}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("namespace", &self.inner.namespace)
            .field("headless", &self.inner.headless)
            .field("updating", &self.inner.updating.get())
            .field("nodes", &self.inner.current.borrow().len())
            .finish()
    }
}

pub(crate) fn frozen_empty_state() -> EditorState {
    let mut state = EditorState::empty();
    state.freeze();
    state
}

fn log_error(error: &EditorError) {
    error!(%error, "Editor error");
}

/// Builds an [`Editor`]
#[derive(Default)]
pub struct EditorBuilder {
    config: EditorConfig,
    nodes: Vec<NodeClass>,
    renderer: Option<Box<dyn Renderer>>,
    selection_adapter: Option<Rc<dyn SelectionAdapter>>,
    on_error: Option<ErrorHandler>,
    parent: Option<WeakEditor>,
    tasks: Option<TaskQueue>,
    initial_state: Option<String>,
}

impl EditorBuilder {
    pub fn config(mut self, config: EditorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn headless(mut self) -> Self {
        self.config.headless = true;
        self
    }

    /// Register an extra node class (replaces a built-in of the same name)
    pub fn node(mut self, class: NodeClass) -> Self {
        self.nodes.push(class);
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn selection_adapter(mut self, adapter: impl SelectionAdapter + 'static) -> Self {
        self.selection_adapter = Some(Rc::new(adapter));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&EditorError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    /// Nest under `parent`; commands propagate through the parent first
    pub fn parent(mut self, parent: &Editor) -> Self {
        self.parent = Some(parent.downgrade());
        self
    }

    /// Share a task queue (defaults to the parent's, then a fresh one)
    pub fn task_queue(mut self, tasks: TaskQueue) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Serialized document to start from
    pub fn initial_state(mut self, json: impl Into<String>) -> Self {
        self.initial_state = Some(json.into());
        self
    }

    pub fn build(self) -> Result<Editor, EditorError> {
        let mut registry = NodeRegistry::with_builtins();
        for class in self.nodes {
            registry.register(class);
        }

        let tasks = self
            .tasks
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(WeakEditor::upgrade)
                    .map(|parent| parent.inner.tasks.clone())
            })
            .unwrap_or_default();

        let editor = Editor {
            inner: Rc::new(EditorInner {
                namespace: self.config.namespace.clone(),
                headless: self.config.headless,
                editable: Cell::new(self.config.editable),
                current: RefCell::new(Rc::new(frozen_empty_state())),
                pending: RefCell::new(None),
                dirty: RefCell::new(DirtyTracker::default()),
                updating: Cell::new(false),
                queue: RefCell::new(VecDeque::new()),
                tags: RefCell::new(HashSet::new()),
                deferred: RefCell::new(Vec::new()),
                transform_iterations: Cell::new(0),
                composition_key: Cell::new(None),
                next_key: Cell::new(1),
                registry: RefCell::new(registry),
                listeners: Listeners::default(),
                commands: RefCell::new(CommandTable::default()),
                renderer: RefCell::new(None),
                elements: RefCell::new(HashMap::new()),
                selection_adapter: self
                    .selection_adapter
                    .unwrap_or_else(|| Rc::new(RetainSelection)),
                decorators: RefCell::new(Rc::new(HashMap::new())),
                pending_decorators: RefCell::new(None),
                on_error: self.on_error.unwrap_or_else(|| Rc::new(log_error)),
                parent: self.parent,
                tasks,
            }),
        };

        if let Some(json) = self.initial_state {
            let state = editor.parse_editor_state(&json)?;
            *editor.inner.current.borrow_mut() = state;
        }

        if let Some(renderer) = self.renderer {
            editor.set_renderer(Some(renderer))?;
        }

        info!(
            namespace = %editor.inner.namespace,
            headless = editor.inner.headless,
            "Editor created"
        );
        Ok(editor)
    }
}
