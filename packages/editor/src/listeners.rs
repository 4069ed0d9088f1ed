//! # Listeners
//!
//! Observer sets fired by the commit pipeline, one per category:
//!
//! | Category       | Fired when                                   |
//! |----------------|----------------------------------------------|
//! | `update`       | every commit                                 |
//! | `text_content` | the document text differs from the last one  |
//! | `decorator`    | the published decorator map changed          |
//! | `mutation`     | the renderer reported mutations for a type   |
//! | `editable`     | the editable flag flipped                    |
//!
//! Each fire iterates a snapshot of the set taken when the fire starts, so
//! listeners added or removed mid-fire only affect the next one.

use crate::editor::Editor;
use crate::node::NodeKey;
use crate::render::{MutatedNodes, NodeMutation};
use crate::state::EditorState;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// What an update listener sees after a commit
#[derive(Debug, Clone, Copy)]
pub struct UpdatePayload<'a> {
    pub editor_state: &'a Rc<EditorState>,
    pub prev_editor_state: &'a Rc<EditorState>,
    pub dirty_elements: &'a IndexMap<NodeKey, bool>,
    pub dirty_leaves: &'a IndexSet<NodeKey>,
    pub normalized_nodes: &'a HashSet<NodeKey>,
    pub tags: &'a HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MutationPayload<'a> {
    pub update_tags: &'a HashSet<String>,
    pub dirty_leaves: &'a IndexSet<NodeKey>,
    pub prev_editor_state: &'a Rc<EditorState>,
}

pub type UpdateListener = Rc<dyn Fn(&UpdatePayload<'_>)>;
pub type TextContentListener = Rc<dyn Fn(&str)>;
pub type DecoratorListener = Rc<dyn Fn(&HashMap<NodeKey, Value>)>;
pub type MutationListener = Rc<dyn Fn(&HashMap<NodeKey, NodeMutation>, &MutationPayload<'_>)>;
pub type EditableListener = Rc<dyn Fn(bool)>;

/// Handle returned by every `register_*` call
#[must_use = "keep the subscription to unregister the listener later"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Remove the listener; later fires no longer see it
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Ordered listener set with stable ids for removal
pub(crate) struct ListenerSet<L> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, L)>>,
}

impl<L: Clone> ListenerSet<L> {
    pub(crate) fn add(&self, listener: L) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn snapshot(&self) -> Vec<L> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<L> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(0),
            entries: RefCell::new(Vec::new()),
        }
    }
}

#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) update: ListenerSet<UpdateListener>,
    pub(crate) text_content: ListenerSet<TextContentListener>,
    pub(crate) decorator: ListenerSet<DecoratorListener>,
    pub(crate) mutation: ListenerSet<(String, MutationListener)>,
    pub(crate) editable: ListenerSet<EditableListener>,
}

/// Run a snapshot of `set`, with the editor's updating flag forced to
/// `mark_updating` for the duration
pub(crate) fn trigger_listeners<L: Clone>(
    editor: &Editor,
    set: &ListenerSet<L>,
    mark_updating: bool,
    mut call: impl FnMut(&L),
) {
    let listeners = set.snapshot();
    if listeners.is_empty() {
        return;
    }
    let _updating = editor.mark_updating(mark_updating);
    for listener in &listeners {
        call(listener);
    }
}

/// Mutation listeners see only the mutations of the type they subscribed to
pub(crate) fn trigger_mutation_listeners(
    editor: &Editor,
    mutated: &MutatedNodes,
    payload: &MutationPayload<'_>,
) {
    for (node_type, listener) in editor.inner.listeners.mutation.snapshot() {
        if let Some(mutations) = mutated.get(&node_type) {
            listener(mutations, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_set_snapshot_is_ordered() {
        let set: ListenerSet<u32> = ListenerSet::default();
        let a = set.add(1);
        set.add(2);
        set.add(3);

        assert_eq!(set.snapshot(), vec![1, 2, 3]);

        set.remove(a);
        assert_eq!(set.snapshot(), vec![2, 3]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unsubscribe_runs_removal_once() {
        let removed = Rc::new(Cell::new(0));
        let counter = removed.clone();
        let subscription = Subscription::new(move || counter.set(counter.get() + 1));

        subscription.unsubscribe();
        assert_eq!(removed.get(), 1);
    }

    #[test]
    fn test_trigger_restores_updating_flag() {
        let editor = Editor::builder().build().unwrap();
        let seen = Rc::new(Cell::new(false));
        let set: ListenerSet<Rc<dyn Fn(&Editor)>> = ListenerSet::default();
        let observed = seen.clone();
        set.add(Rc::new(move |editor: &Editor| observed.set(editor.is_updating())));

        trigger_listeners(&editor, &set, true, |listener| listener(&editor));

        assert!(seen.get());
        assert!(!editor.is_updating());
    }
}
