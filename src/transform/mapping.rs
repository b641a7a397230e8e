//! Name mapping
//!
//! Pulled variables get their data type and array shape encoded in the file name
//! (`Speed.double.array`), known atvise types get a dedicated extension (`Help.help.html`).
//! Pushing strips the extensions again and restores the type information they carry.

use super::{TransformContext, Transformed, Transformer};
use crate::error::SyncError;
use crate::model::node_id::{BASE_OBJECT_TYPE, BASE_VARIABLE_TYPE, OBJECTS_FOLDER};
use crate::model::{Node, NodeId};
use crate::types::{ArrayType, DataType};
use async_trait::async_trait;
use std::sync::Arc;

/// Numeric id of the `Types` folder.
pub const TYPES_FOLDER: u32 = 86;

/// Standard ids collapsed out of pulled paths.
pub const DEFAULT_COMPACT_MAPPING: [u32; 4] = [BASE_OBJECT_TYPE, BASE_VARIABLE_TYPE, OBJECTS_FOLDER, TYPES_FOLDER];

/// Type definitions with a dedicated extension and the data type they imply.
const STANDARD_TYPES: [(&str, &str, DataType); 2] = [
    ("VariableTypes.ATVISE.HtmlHelp", ".help.html", DataType::ByteString),
    ("VariableTypes.ATVISE.TranslationTable", ".locs.xml", DataType::XmlElement),
];

const ARRAY_EXTENSIONS: [(ArrayType, &str); 2] = [(ArrayType::Array, ".array"), (ArrayType::Matrix, ".matrix")];

pub fn data_type_extension(data_type: DataType) -> Option<&'static str> {
    let extension = match data_type {
        DataType::Boolean => ".bool",
        DataType::SByte => ".sbyte",
        DataType::Byte => ".byte",
        DataType::Int16 => ".int16",
        DataType::UInt16 => ".uint16",
        DataType::Int32 => ".int32",
        DataType::UInt32 => ".uint32",
        DataType::Int64 => ".int64",
        DataType::UInt64 => ".uint64",
        DataType::Float => ".float",
        DataType::Double => ".double",
        DataType::String => ".string",
        DataType::DateTime => ".datetime",
        DataType::Guid => ".guid",
        DataType::XmlElement => ".xml",
        DataType::NodeId => ".nodeid",
        DataType::ExpandedNodeId => ".enodeid",
        DataType::StatusCode => ".status",
        DataType::QualifiedName => ".name",
        DataType::LocalizedText => ".text",
        DataType::ExtensionObject => ".obj",
        DataType::DataValue => ".value",
        DataType::Variant => ".variant",
        DataType::DiagnosticInfo => ".info",
        DataType::Null | DataType::ByteString => return None,
    };
    Some(extension)
}

fn name_conflict(node: &Node, extension: &str) -> SyncError {
    SyncError::Conflict(format!(
        "{} should not end with '{}'",
        node.key(),
        extension
    ))
}

pub struct MappingTransformer {
    compact_mapping: Vec<u32>,
}

impl MappingTransformer {
    pub fn new(compact_mapping: Vec<u32>) -> Self {
        Self { compact_mapping }
    }

    fn is_compacted(&self, node: &Node) -> bool {
        matches!(node.server_id(), Some(NodeId::Numeric(id)) if self.compact_mapping.contains(id))
    }

    /// Rebuilds a parent chain without the collapsed ancestors.
    fn compact_parent(&self, parent: Option<&Arc<Node>>) -> Option<Arc<Node>> {
        let parent = parent?;
        let grandparent = self.compact_parent(parent.parent.as_ref());
        if self.is_compacted(parent) {
            return grandparent;
        }
        let unchanged = match (&grandparent, &parent.parent) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            Some(parent.clone())
        } else {
            Some(Arc::new(parent.with_parent(grandparent)))
        }
    }

    fn add_extensions(node: &mut Node) -> Result<(), SyncError> {
        let mut standard = false;
        for (type_definition, extension, _) in STANDARD_TYPES {
            if node.is_variable() && node.has_type_definition(type_definition) {
                let name = format!("{}{}", node.name(), extension);
                node.rename_to(name);
                standard = true;
            } else if node.file_name.ends_with(extension) {
                return Err(name_conflict(node, extension));
            }
        }

        if node.is_variable() && !standard {
            if let Some(extension) = node.value.data_type.and_then(data_type_extension) {
                let name = format!("{}{}", node.name(), extension);
                node.rename_to(name);
            }
        }

        for (array_type, extension) in ARRAY_EXTENSIONS {
            if node.is_variable() && node.value.array_type == Some(array_type) {
                if !standard {
                    let name = format!("{}{}", node.name(), extension);
                    node.rename_to(name);
                }
            } else if node.file_name.ends_with(extension) {
                return Err(name_conflict(node, extension));
            }
        }
        Ok(())
    }

    fn strip_extensions(node: &mut Node) -> Result<(), SyncError> {
        let mut standard = false;
        for (_, extension, data_type) in STANDARD_TYPES {
            if let Some(base) = node.name().strip_suffix(extension) {
                let base = base.to_string();
                standard = true;
                if node.is_variable() && node.value.data_type.is_none() {
                    node.value.data_type = Some(data_type);
                }
                node.rename_to(base);
            }
        }
        if standard || !node.is_variable() {
            return Ok(());
        }

        for (array_type, extension) in ARRAY_EXTENSIONS {
            if let Some(base) = node.name().strip_suffix(extension) {
                let base = base.to_string();
                match node.value.array_type {
                    Some(existing) if existing != array_type => {
                        return Err(SyncError::transform(
                            node.node_id(),
                            format!("Array type {:?} does not match extension '{}'", existing, extension),
                        ))
                    }
                    _ => node.value.array_type = Some(array_type),
                }
                node.rename_to(base);
                break;
            }
        }

        for data_type in DataType::ALL {
            let Some(extension) = data_type_extension(data_type) else {
                continue;
            };
            let matches_type = node.value.data_type.map(|d| d == data_type).unwrap_or(true);
            if let Some(base) = node.name().strip_suffix(extension).filter(|_| matches_type) {
                let base = base.to_string();
                node.value.data_type = Some(data_type);
                node.rename_to(base);
                break;
            }
        }
        Ok(())
    }
}

impl Default for MappingTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACT_MAPPING.to_vec())
    }
}

#[async_trait]
impl Transformer for MappingTransformer {
    fn name(&self) -> &'static str {
        "mapping"
    }

    async fn transform_from_db(
        &self,
        mut node: Node,
        _context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        if !node.fully_mapped && !node.parent_resolves_metadata {
            Self::add_extensions(&mut node)?;
        }
        node.parent = self.compact_parent(node.parent.as_ref());
        Ok(Transformed::Pass(node))
    }

    async fn transform_from_filesystem(
        &self,
        mut node: Node,
        _context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        Self::strip_extensions(&mut node)?;
        Ok(Transformed::Pass(node))
    }
}
