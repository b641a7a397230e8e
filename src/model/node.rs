//! The node entity
//!
//! A node is either discovered on the server (`Origin::Browsed`) or read from a definition file
//! (`Origin::File`). Both flavors share every field; they differ in which name slot is the
//! visible, renameable one: browsed nodes are renamed on disk (`file_name`), file nodes are
//! renamed on the server (`id_name`).
//!
//! Parents are frozen snapshots (`Arc<Node>`). A node's children are only created after the node
//! itself was handled, so the snapshot already carries every rename applied to the parent.

use crate::error::SyncError;
use crate::model::node_id::{NodeId, RESOURCE_CHILD_NAMES};
use crate::model::references::{ReferenceMap, References};
use crate::model::variant::{ValueSlot, Variant};
use crate::types::{reference_type, ArrayType, DataType, NodeClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const DISPLAY_TYPE: &str = "VariableTypes.ATVISE.Display";
pub const SCRIPT_TYPE: &str = "VariableTypes.ATVISE.ScriptCode";
pub const QUICK_DYNAMIC_TYPE: &str = "VariableTypes.ATVISE.QuickDynamic";
pub const DISPLAY_SCRIPT_TYPE: &str = "VariableTypes.ATVISE.DisplayScript";

#[derive(Debug, Clone, PartialEq)]
pub struct BrowsedInfo {
    /// The id the server knows this node by.
    pub id: NodeId,
    /// Browse names of the hierarchical children found while browsing this node.
    pub child_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// The definition file this node was read from.
    pub definition_path: PathBuf,
    /// Where the node's value file (or its part directory) lives.
    pub value_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Browsed(BrowsedInfo),
    File(FileInfo),
}

/// Contents of a definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_type: Option<ArrayType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class: Option<NodeClass>,
    #[serde(default)]
    pub references: BTreeMap<String, Vec<NodeId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub file_name: String,
    pub id_name: String,
    pub special_id: Option<String>,
    pub parent: Option<Arc<Node>>,
    pub node_class: NodeClass,
    pub references: References,
    pub value: ValueSlot,
    /// Split parts share their container's identity and metadata.
    pub parent_resolves_metadata: bool,
    /// Set by splitting transformers so the name is not mapped again.
    pub fully_mapped: bool,
    pub origin: Origin,
}

impl Node {
    fn with_origin(
        name: &str,
        node_class: NodeClass,
        parent: Option<Arc<Node>>,
        origin: Origin,
    ) -> Self {
        Self {
            file_name: name.to_string(),
            id_name: name.to_string(),
            special_id: None,
            parent,
            node_class,
            references: References::new(),
            value: ValueSlot::default(),
            parent_resolves_metadata: false,
            fully_mapped: false,
            origin,
        }
    }

    pub fn browsed(
        name: &str,
        id: NodeId,
        node_class: NodeClass,
        parent: Option<Arc<Node>>,
    ) -> Self {
        Self::with_origin(
            name,
            node_class,
            parent,
            Origin::Browsed(BrowsedInfo {
                id,
                child_names: Vec::new(),
            }),
        )
    }

    /// Builds a file node from its definition. References from the file count as resolved.
    pub fn from_definition(
        name: &str,
        definition: &Definition,
        parent: Option<Arc<Node>>,
        info: FileInfo,
    ) -> Result<Self, SyncError> {
        let node_class = match (definition.node_class, definition.data_type) {
            (Some(class), _) => class,
            (None, Some(_)) => NodeClass::Variable,
            (None, None) => {
                return Err(SyncError::transform(
                    info.definition_path.display().to_string(),
                    "Definition has neither a node class nor a data type",
                ))
            }
        };
        let mut node = Self::with_origin(name, node_class, parent, Origin::File(info));
        node.special_id = definition.node_id.clone();
        node.references = References::resolved_from(ReferenceMap::from_json(&definition.references)?);
        if node_class == NodeClass::Variable {
            node.value.data_type = definition.data_type;
            node.value.array_type = definition.array_type;
        }
        Ok(node)
    }

    /// A part file of a split container. Shares identity and references with the container.
    pub fn split_part(container: &Arc<Node>, file_name: String, variant: Variant) -> Self {
        Self {
            file_name,
            id_name: container.id_name.clone(),
            special_id: None,
            parent: Some(container.clone()),
            node_class: NodeClass::Variable,
            references: container.references.clone(),
            value: ValueSlot::from_variant(variant),
            parent_resolves_metadata: true,
            fully_mapped: true,
            origin: container.origin.clone(),
        }
    }

    /// The externally visible name.
    pub fn name(&self) -> &str {
        match self.origin {
            Origin::Browsed(_) => &self.file_name,
            Origin::File(_) => &self.id_name,
        }
    }

    pub fn rename_to(&mut self, name: impl Into<String>) {
        match self.origin {
            Origin::Browsed(_) => self.file_name = name.into(),
            Origin::File(_) => self.id_name = name.into(),
        }
    }

    /// The server id of a browsed node.
    pub fn server_id(&self) -> Option<&NodeId> {
        match &self.origin {
            Origin::Browsed(info) => Some(&info.id),
            Origin::File(_) => None,
        }
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        match &self.origin {
            Origin::File(info) => Some(info),
            Origin::Browsed(_) => None,
        }
    }

    pub fn child_names(&self) -> &[String] {
        match &self.origin {
            Origin::Browsed(info) => &info.child_names,
            Origin::File(_) => &[],
        }
    }

    pub fn set_child_names(&mut self, names: Vec<String>) {
        if let Origin::Browsed(info) = &mut self.origin {
            info.child_names = names;
        }
    }

    fn identity(&self) -> (String, char) {
        if let Some(special) = &self.special_id {
            let separator = if special.contains(".RESOURCES") {
                '/'
            } else {
                '.'
            };
            return (special.clone(), separator);
        }
        let parent = match &self.parent {
            Some(parent) => parent,
            None => return (self.id_name.clone(), '.'),
        };
        let (parent_id, separator) = parent.identity();
        if self.parent_resolves_metadata {
            return (parent_id, separator);
        }
        let join = if separator == '/' && RESOURCE_CHILD_NAMES.contains(&self.id_name.as_str()) {
            '.'
        } else {
            separator
        };
        let child_separator = if self.id_name == "RESOURCES" { '/' } else { join };
        (
            format!("{}{}{}", parent_id, join, self.id_name),
            child_separator,
        )
    }

    /// The identity string: `special_id`, or the `id_name` chain joined with contextual
    /// separators.
    pub fn node_id(&self) -> String {
        self.identity().0
    }

    /// The key the node is tracked by during a run: the server id when browsed.
    pub fn key(&self) -> String {
        match self.server_id() {
            Some(id) => id.to_string(),
            None => self.node_id(),
        }
    }

    fn own_file_path(&self) -> Vec<String> {
        let mut path = match &self.parent {
            Some(parent) => parent.own_file_path(),
            None => Vec::new(),
        };
        path.push(self.file_name.clone());
        path
    }

    /// Ancestor file names: the directory the node is written to.
    pub fn file_path(&self) -> Vec<String> {
        match &self.parent {
            Some(parent) => parent.own_file_path(),
            None => Vec::new(),
        }
    }

    pub fn is_variable(&self) -> bool {
        self.node_class == NodeClass::Variable
    }

    pub fn type_definition(&self) -> Option<&NodeId> {
        self.references
            .get_single(reference_type::HAS_TYPE_DEFINITION)
    }

    pub fn modelling_rule(&self) -> Option<&NodeId> {
        self.references.get_single(reference_type::HAS_MODELLING_RULE)
    }

    pub fn has_type_definition(&self, type_definition: &str) -> bool {
        self.type_definition()
            .and_then(NodeId::as_str)
            .map(|t| t == type_definition)
            .unwrap_or(false)
    }

    pub fn is_display(&self) -> bool {
        self.has_type_definition(DISPLAY_TYPE)
    }

    pub fn is_script(&self) -> bool {
        self.has_type_definition(SCRIPT_TYPE)
    }

    pub fn is_quick_dynamic(&self) -> bool {
        self.has_type_definition(QUICK_DYNAMIC_TYPE)
    }

    pub fn is_display_script(&self) -> bool {
        self.has_type_definition(DISPLAY_SCRIPT_TYPE)
    }

    /// Split parts carry no definition file of their own.
    pub fn has_unresolved_metadata(&self) -> bool {
        !self.parent_resolves_metadata
    }

    /// The definition file contents.
    pub fn metadata(&self) -> Result<Definition, SyncError> {
        if self.parent_resolves_metadata {
            return Ok(Definition::default());
        }
        let mut definition = Definition {
            node_id: self.special_id.clone(),
            references: self.references.canonical().to_json(),
            ..Definition::default()
        };
        if self.is_variable() {
            let variant = self.value.variant(&self.node_id())?;
            definition.data_type = Some(variant.data_type);
            definition.array_type = Some(variant.array_type);
        } else {
            definition.node_class = Some(self.node_class);
        }
        Ok(definition)
    }

    /// The variable's complete value.
    pub fn variant(&self) -> Result<Variant, SyncError> {
        self.value.variant(&self.node_id())
    }

    /// A snapshot of a node with a different parent.
    pub fn with_parent(&self, parent: Option<Arc<Node>>) -> Node {
        let mut node = self.clone();
        node.parent = parent;
        node
    }
}
