//! # Node Registry
//!
//! Maps a node type name to a [`NodeClass`] capability record and the ordered
//! list of transforms registered for that type.
//!
//! Node values carry only their type name; import, export, decoration and
//! transforms are looked up here whenever the update core needs them.

use crate::errors::EditorError;
use crate::node::{DecoratorData, ElementData, Node, NodeData, NodeKey, NodeKind, TextData, TextMode};
use crate::selection::{RangeSelection, Selection};
use crate::serialization::SerializedNode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Builds node data from a serialized record (children are attached separately)
pub type ImportFn = Rc<dyn Fn(&SerializedNode) -> Result<NodeData, EditorError>>;

/// Writes kind-specific fields of a node into its serialized record
pub type ExportFn = Rc<dyn Fn(&Node, &mut Map<String, Value>)>;

/// Produces the decoration published for a decorator node
pub type DecorateFn = Rc<dyn Fn(&Node) -> Value>;

/// Enforces a per-type invariant on a dirty node
pub type NodeTransform = Rc<dyn Fn(NodeKey) -> Result<(), EditorError>>;

/// Adjusts the pending range selection when it lands on a node of this type
pub type SelectionTransform =
    Rc<dyn Fn(NodeKey, Option<&Selection>, &mut RangeSelection) -> Result<(), EditorError>>;

/// Capability record for one node type
#[derive(Clone)]
pub struct NodeClass {
    type_name: String,
    kind: NodeKind,
    version: u32,
    import: Option<ImportFn>,
    export: Option<ExportFn>,
    decorate: Option<DecorateFn>,
    selection_transform: Option<SelectionTransform>,
}

impl NodeClass {
    fn new(type_name: impl Into<String>, kind: NodeKind, import: Option<ImportFn>) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            version: 1,
            import,
            export: None,
            decorate: None,
            selection_transform: None,
        }
    }

    pub(crate) fn root() -> Self {
        Self::new("root", NodeKind::Root, Some(Rc::new(import_element)))
    }

    /// Container type with the default element import
    pub fn element(type_name: impl Into<String>) -> Self {
        Self::new(type_name, NodeKind::Element, Some(Rc::new(import_element)))
    }

    /// Text type with the default text import
    pub fn text(type_name: impl Into<String>) -> Self {
        Self::new(type_name, NodeKind::Text, Some(Rc::new(import_text)))
    }

    pub fn line_break(type_name: impl Into<String>) -> Self {
        Self::new(
            type_name,
            NodeKind::LineBreak,
            Some(Rc::new(|_: &SerializedNode| Ok(NodeData::LineBreak))),
        )
    }

    /// Decorator type; has no import until [`with_import`](Self::with_import) is called
    pub fn decorator(type_name: impl Into<String>) -> Self {
        Self::new(type_name, NodeKind::Decorator, None)
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_import(
        mut self,
        import: impl Fn(&SerializedNode) -> Result<NodeData, EditorError> + 'static,
    ) -> Self {
        self.import = Some(Rc::new(import));
        self
    }

    pub fn with_export(mut self, export: impl Fn(&Node, &mut Map<String, Value>) + 'static) -> Self {
        self.export = Some(Rc::new(export));
        self
    }

    pub fn with_decorate(mut self, decorate: impl Fn(&Node) -> Value + 'static) -> Self {
        self.decorate = Some(Rc::new(decorate));
        self
    }

    pub fn with_selection_transform(
        mut self,
        transform: impl Fn(NodeKey, Option<&Selection>, &mut RangeSelection) -> Result<(), EditorError>
            + 'static,
    ) -> Self {
        self.selection_transform = Some(Rc::new(transform));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn import(&self) -> Option<&ImportFn> {
        self.import.as_ref()
    }

    pub(crate) fn selection_transform(&self) -> Option<&SelectionTransform> {
        self.selection_transform.as_ref()
    }

    /// Kind-specific serialized fields
    pub(crate) fn export_fields(&self, node: &Node) -> Map<String, Value> {
        let mut fields = Map::new();
        match &self.export {
            Some(export) => export(node, &mut fields),
            None => export_default(node, &mut fields),
        }
        fields
    }

    /// Decoration for a decorator node; the raw payload unless overridden
    pub(crate) fn decorate(&self, node: &Node) -> Option<Value> {
        match (&self.decorate, &node.data) {
            (Some(decorate), _) => Some(decorate(node)),
            (None, NodeData::Decorator(data)) => Some(data.payload.clone()),
            _ => None,
        }
    }

    /// Whether `data` is the payload shape this class produces
    pub(crate) fn accepts(&self, data: &NodeData) -> bool {
        matches!(
            (self.kind, data),
            (NodeKind::Root | NodeKind::Element, NodeData::Element(_))
                | (NodeKind::Text, NodeData::Text(_))
                | (NodeKind::LineBreak, NodeData::LineBreak)
                | (NodeKind::Decorator, NodeData::Decorator(_))
        )
    }
}

impl fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClass")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("has_import", &self.import.is_some())
            .finish()
    }
}

/// Optional unsigned field, zero when absent
fn u32_field(serialized: &SerializedNode, name: &str) -> Result<u32, EditorError> {
    let Some(value) = serialized.fields.get(name) else {
        return Ok(0);
    };
    value
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| {
            EditorError::InvalidStructure(format!(
                "{} `{name}` must be an unsigned 32-bit integer, got {value}",
                serialized.node_type
            ))
        })
}

fn import_element(serialized: &SerializedNode) -> Result<NodeData, EditorError> {
    let indent = u32_field(serialized, "indent")?;
    Ok(NodeData::Element(ElementData {
        children: Vec::new(),
        indent,
    }))
}

fn import_text(serialized: &SerializedNode) -> Result<NodeData, EditorError> {
    let fields = &serialized.fields;
    let text = fields
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let format = u32_field(serialized, "format")?;
    let style = fields
        .get("style")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mode = match fields.get("mode") {
        Some(mode) => serde_json::from_value::<TextMode>(mode.clone())?,
        None => TextMode::Normal,
    };
    Ok(NodeData::Text(TextData {
        text,
        format,
        style,
        mode,
    }))
}

fn export_default(node: &Node, fields: &mut Map<String, Value>) {
    match node.data() {
        NodeData::Element(element) => {
            fields.insert("indent".to_string(), Value::from(element.indent));
        }
        NodeData::Text(text) => {
            fields.insert("text".to_string(), Value::from(text.text.clone()));
            fields.insert("format".to_string(), Value::from(text.format));
            fields.insert("style".to_string(), Value::from(text.style.clone()));
            fields.insert(
                "mode".to_string(),
                serde_json::to_value(text.mode).unwrap_or(Value::Null),
            );
        }
        NodeData::LineBreak => {}
        NodeData::Decorator(DecoratorData { payload }) => {
            fields.insert("payload".to_string(), payload.clone());
        }
    }
}

struct RegisteredNode {
    class: NodeClass,
    transforms: Vec<NodeTransform>,
}

/// Registered node classes and their transforms
pub struct NodeRegistry {
    nodes: HashMap<String, RegisteredNode>,
}

impl NodeRegistry {
    /// Registry with `root`, `paragraph`, `text` and `linebreak`
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            nodes: HashMap::new(),
        };
        registry.register(NodeClass::root());
        registry.register(NodeClass::element("paragraph"));
        registry.register(NodeClass::text("text"));
        registry.register(NodeClass::line_break("linebreak"));
        registry
    }

    /// Register (or replace) a class; existing transforms for the type are kept
    pub fn register(&mut self, class: NodeClass) {
        let transforms = self
            .nodes
            .remove(class.type_name())
            .map(|registered| registered.transforms)
            .unwrap_or_default();
        self.nodes.insert(
            class.type_name().to_string(),
            RegisteredNode { class, transforms },
        );
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.nodes.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Result<&NodeClass, EditorError> {
        self.nodes
            .get(type_name)
            .map(|registered| &registered.class)
            .ok_or_else(|| EditorError::UnregisteredNodeType(type_name.to_string()))
    }

    /// Append a transform; returns `false` if this exact callback is already registered
    pub(crate) fn add_transform(
        &mut self,
        type_name: &str,
        transform: NodeTransform,
    ) -> Result<bool, EditorError> {
        let registered = self
            .nodes
            .get_mut(type_name)
            .ok_or_else(|| EditorError::UnregisteredNodeType(type_name.to_string()))?;
        if registered
            .transforms
            .iter()
            .any(|existing| Rc::ptr_eq(existing, &transform))
        {
            return Ok(false);
        }
        registered.transforms.push(transform);
        Ok(true)
    }

    pub(crate) fn remove_transform(&mut self, type_name: &str, transform: &NodeTransform) {
        if let Some(registered) = self.nodes.get_mut(type_name) {
            registered
                .transforms
                .retain(|existing| !Rc::ptr_eq(existing, transform));
        }
    }

    /// Transforms in registration order
    pub(crate) fn transforms(&self, type_name: &str) -> Result<Vec<NodeTransform>, EditorError> {
        self.nodes
            .get(type_name)
            .map(|registered| registered.transforms.clone())
            .ok_or_else(|| EditorError::UnregisteredNodeType(type_name.to_string()))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
