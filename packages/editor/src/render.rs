//! # Renderer Contract
//!
//! The update core never patches a view itself. On commit it hands the old
//! and new snapshots plus the dirty sets to a [`Renderer`], which keeps the
//! key → element bindings current and reports which nodes it created,
//! updated or destroyed.
//!
//! A renderer must be idempotent when replayed with a full reconcile: after a
//! failure the core resets its bindings and re-renders the last good snapshot
//! from scratch.

use crate::dirty::DirtyType;
use crate::node::NodeKey;
use crate::state::EditorState;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Reconcile failed: {0}")]
    Reconcile(String),

    #[error("Render target detached")]
    Detached,
}

/// Opaque handle of the view element bound to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMutation {
    Created,
    Updated,
    Destroyed,
}

/// Mutations grouped by node type, then key
pub type MutatedNodes = HashMap<String, HashMap<NodeKey, NodeMutation>>;

/// Everything a renderer sees for one commit
pub struct ReconcileContext<'a> {
    pub prev: &'a EditorState,
    pub next: &'a EditorState,
    pub dirty_type: DirtyType,
    pub dirty_elements: &'a IndexMap<NodeKey, bool>,
    pub dirty_leaves: &'a IndexSet<NodeKey>,
    /// Key → element bindings, owned by the commit pipeline
    pub elements: &'a mut HashMap<NodeKey, ElementHandle>,
}

pub trait Renderer {
    /// Bring the view from `prev` to `next`
    fn reconcile(&mut self, cx: ReconcileContext<'_>) -> Result<Option<MutatedNodes>, RenderError>;

    /// Drop any view state; the next reconcile is a full one
    fn reset(&mut self) {}
}

/// Reference renderer that diffs node maps instead of patching a real view.
///
/// Only dirty keys are compared unless the commit is a full reconcile.
#[derive(Debug, Default)]
pub struct TreeDiffRenderer {
    next_handle: u64,
}

impl TreeDiffRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ElementHandle {
        self.next_handle += 1;
        ElementHandle(self.next_handle)
    }
}

impl Renderer for TreeDiffRenderer {
    fn reconcile(&mut self, cx: ReconcileContext<'_>) -> Result<Option<MutatedNodes>, RenderError> {
        let candidates: BTreeSet<NodeKey> = if cx.dirty_type == DirtyType::FullReconcile {
            cx.prev
                .nodes()
                .chain(cx.next.nodes())
                .map(|node| node.key())
                .collect()
        } else {
            cx.dirty_leaves
                .iter()
                .chain(cx.dirty_elements.keys())
                .copied()
                .collect()
        };

        let mut mutated = MutatedNodes::new();
        for key in candidates {
            let (node_type, mutation) = match (cx.prev.node(key), cx.next.node(key)) {
                (None, Some(node)) => {
                    let handle = self.allocate();
                    cx.elements.insert(key, handle);
                    (node.node_type(), NodeMutation::Created)
                }
                (Some(old), Some(new)) => {
                    if !cx.elements.contains_key(&key) {
                        let handle = self.allocate();
                        cx.elements.insert(key, handle);
                    }
                    if old == new {
                        continue;
                    }
                    (new.node_type(), NodeMutation::Updated)
                }
                (Some(old), None) => {
                    cx.elements.remove(&key);
                    (old.node_type(), NodeMutation::Destroyed)
                }
                (None, None) => continue,
            };
            mutated
                .entry(node_type.to_string())
                .or_default()
                .insert(key, mutation);
        }

        Ok(Some(mutated))
    }

    fn reset(&mut self) {
        self.next_handle = 0;
    }
}
