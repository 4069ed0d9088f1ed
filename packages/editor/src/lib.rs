//! # Folio Editor
//!
//! Update and reconciliation core for a structured rich-text editor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ update(f): mutate the pending snapshot      │
//! │  - node API through the active context      │
//! │  - every write marks nodes dirty            │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ transforms: run to a fixed point            │
//! │  - leaves (normalized) first, root last     │
//! │  - detached nodes collected                 │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ commit: freeze → swap → reconcile           │
//! │  - listeners, commands, deferred callbacks  │
//! │  - next queued update                       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Snapshots are immutable once committed**: updates write to a pending copy
//! 2. **Dirtiness drives everything**: transforms and rendering only visit dirty nodes
//! 3. **One update at a time**: nested updates queue and run in FIFO order
//! 4. **Renderers are replaceable**: a failed render replays the last good snapshot
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_editor::{create_paragraph, create_text, get_root, Editor, UpdateOptions};
//!
//! let editor = Editor::builder().build()?;
//!
//! editor.update_with(
//!     || {
//!         let paragraph = create_paragraph()?;
//!         paragraph.append(create_text("hello")?)?;
//!         get_root()?.append(paragraph)
//!     },
//!     UpdateOptions::new().discrete(),
//! )?;
//!
//! assert_eq!(editor.editor_state().text_content(), "hello");
//! ```
//!
//! Without `discrete()` the commit is scheduled on the editor's
//! [`TaskQueue`]; drain it with [`TaskQueue::run_until_idle`].

mod commands;
mod config;
mod context;
mod dirty;
mod editor;
mod errors;
mod gc;
mod listeners;
mod mutations;
mod node;
mod normalize;
mod pipeline;
mod registry;
mod render;
mod scheduler;
mod selection;
mod serialization;
mod state;
mod transforms;
mod update;

pub use commands::{Command, CommandListener, CommandPriority, SELECTION_CHANGE_COMMAND};
pub use config::{EditorConfig, DEFAULT_CONFIG_NAME};
pub use context::{active_editor, is_read_only, read_active_state, with_active_context};
pub use dirty::{DirtyTracker, DirtyType};
pub use editor::{Editor, EditorBuilder, ErrorHandler, WeakEditor};
pub use errors::EditorError;
pub use listeners::{
    DecoratorListener, EditableListener, MutationListener, MutationPayload, Subscription,
    TextContentListener, UpdateListener, UpdatePayload,
};
pub use mutations::{
    create_decorator, create_element, create_line_break, create_node, create_paragraph,
    create_text, get_composition_key, get_node_by_key, get_root, nodes_of_type,
    set_composition_key,
};
pub use node::{DecoratorData, ElementData, Node, NodeData, NodeKey, NodeKind, TextData, TextMode};
pub use registry::{
    DecorateFn, ExportFn, ImportFn, NodeClass, NodeRegistry, NodeTransform, SelectionTransform,
};
pub use render::{
    ElementHandle, MutatedNodes, NodeMutation, ReconcileContext, RenderError, Renderer,
    TreeDiffRenderer,
};
pub use scheduler::TaskQueue;
pub use selection::{
    get_selection, set_selection, InputEvent, NodeSelection, Point, PointKind, RangeSelection,
    RetainSelection, Selection, SelectionAdapter,
};
pub use serialization::{SerializedEditorState, SerializedNode};
pub use state::{EditorState, DOUBLE_LINE_BREAK};
pub use update::{
    add_update_tag, has_update_tag, UpdateOptions, HISTORY_MERGE_TAG, SKIP_SELECTION_SYNC_TAG,
};
