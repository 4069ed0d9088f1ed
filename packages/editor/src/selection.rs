//! # Selection
//!
//! Selection values stored on a snapshot, plus the collaborator contract used
//! to create and publish selections for rendering editors.
//!
//! Selection internals (anchor/focus movement, DOM mapping) belong to the host;
//! the update core only needs to clone, compare, validate and hand selections
//! to the [`SelectionAdapter`].

use crate::context;
use crate::editor::Editor;
use crate::errors::EditorError;
use crate::node::NodeKey;
use std::collections::{BTreeSet, HashSet};

/// Whether a point addresses a character offset or a child index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Text,
    Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Text,
        }
    }

    pub fn element(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Element,
        }
    }
}

/// Anchor/focus selection
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSelection {
    pub anchor: Point,
    pub focus: Point,
    pub format: u32,
    pub style: String,
    pub(crate) dirty: bool,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            format: 0,
            style: String::new(),
            dirty: true,
        }
    }

    pub fn collapsed(point: Point) -> Self {
        Self::new(point, point)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// Selection of whole nodes (e.g. a selected image)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSelection {
    nodes: BTreeSet<NodeKey>,
    pub(crate) dirty: bool,
}

impl NodeSelection {
    pub fn new(keys: impl IntoIterator<Item = NodeKey>) -> Self {
        Self {
            nodes: keys.into_iter().collect(),
            dirty: true,
        }
    }

    pub fn add(&mut self, key: NodeKey) {
        self.dirty = true;
        self.nodes.insert(key);
    }

    pub fn delete(&mut self, key: NodeKey) {
        if self.nodes.remove(&key) {
            self.dirty = true;
        }
    }

    pub fn has(&self, key: NodeKey) -> bool {
        self.nodes.contains(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Range(RangeSelection),
    Node(NodeSelection),
}

impl Selection {
    /// Value equality, ignoring the dirty flag
    pub fn is(&self, other: &Selection) -> bool {
        match (self, other) {
            (Selection::Range(a), Selection::Range(b)) => {
                a.anchor == b.anchor && a.focus == b.focus && a.format == b.format
            }
            (Selection::Node(a), Selection::Node(b)) => a.nodes == b.nodes,
            _ => false,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Selection::Range(_))
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Selection::Range(range) => range.dirty,
            Selection::Node(nodes) => nodes.dirty,
        }
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        match self {
            Selection::Range(range) => range.dirty = dirty,
            Selection::Node(nodes) => nodes.dirty = dirty,
        }
    }

    /// Copy carried into a fresh pending snapshot
    pub(crate) fn clone_clean(&self) -> Selection {
        let mut selection = self.clone();
        selection.set_dirty(false);
        selection
    }

    /// Whether the selection references `key` at all
    pub fn references(&self, key: NodeKey) -> bool {
        match self {
            Selection::Range(range) => range.anchor.key == key || range.focus.key == key,
            Selection::Node(nodes) => nodes.has(key),
        }
    }
}

/// Event that triggered an update, handed to [`SelectionAdapter::create_selection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub event_type: String,
    pub data: Option<String>,
}

impl InputEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Host-side selection collaborator for rendering editors
pub trait SelectionAdapter {
    /// Compute the selection a fresh pending snapshot starts with
    fn create_selection(&self, editor: &Editor, event: Option<&InputEvent>) -> Option<Selection>;

    /// Publish the committed selection to the host (cursor, DOM range, ...)
    fn sync_external_selection(
        &self,
        previous: Option<&Selection>,
        next: Option<&Selection>,
        editor: &Editor,
        tags: &HashSet<String>,
        node_count: usize,
    );
}

/// Default adapter: carries the committed selection forward and publishes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainSelection;

impl SelectionAdapter for RetainSelection {
    fn create_selection(&self, editor: &Editor, _event: Option<&InputEvent>) -> Option<Selection> {
        editor.editor_state().selection().map(Selection::clone_clean)
    }

    fn sync_external_selection(
        &self,
        _previous: Option<&Selection>,
        next: Option<&Selection>,
        _editor: &Editor,
        _tags: &HashSet<String>,
        node_count: usize,
    ) {
        tracing::trace!(has_selection = next.is_some(), node_count, "Selection sync skipped");
    }
}

/// Selection of the active snapshot
pub fn get_selection() -> Result<Option<Selection>, EditorError> {
    context::read_active_state(|state| state.selection().cloned())
}

/// Replace the selection of the pending snapshot, marking it dirty
pub fn set_selection(selection: Option<Selection>) -> Result<(), EditorError> {
    context::write_active_state(|state, _editor| {
        state.selection = selection.map(|mut selection| {
            selection.set_dirty(true);
            selection
        });
        Ok(())
    })
}
