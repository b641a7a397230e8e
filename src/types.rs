//! Protocol vocabulary shared by every layer: node classes, reference types, data types,
//! array shapes and the status codes the write path reacts to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node class discriminator with its wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

impl NodeClass {
    pub const ALL: [NodeClass; 8] = [
        NodeClass::Object,
        NodeClass::Variable,
        NodeClass::Method,
        NodeClass::ObjectType,
        NodeClass::VariableType,
        NodeClass::ReferenceType,
        NodeClass::DataType,
        NodeClass::View,
    ];

    pub fn value(self) -> u32 {
        match self {
            NodeClass::Object => 1,
            NodeClass::Variable => 2,
            NodeClass::Method => 4,
            NodeClass::ObjectType => 8,
            NodeClass::VariableType => 16,
            NodeClass::ReferenceType => 32,
            NodeClass::DataType => 64,
            NodeClass::View => 128,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.value() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeClass::Object => "Object",
            NodeClass::Variable => "Variable",
            NodeClass::Method => "Method",
            NodeClass::ObjectType => "ObjectType",
            NodeClass::VariableType => "VariableType",
            NodeClass::ReferenceType => "ReferenceType",
            NodeClass::DataType => "DataType",
            NodeClass::View => "View",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference type ids. Plain integers so unknown server types survive a round trip.
pub mod reference_type {
    /// How a node hangs below its parent. Never sent to the server as-is.
    pub const TO_PARENT: i32 = -1;
    pub const REFERENCES: i32 = 31;
    pub const NON_HIERARCHICAL_REFERENCES: i32 = 32;
    pub const HIERARCHICAL_REFERENCES: i32 = 33;
    pub const HAS_CHILD: i32 = 34;
    pub const ORGANIZES: i32 = 35;
    pub const HAS_EVENT_SOURCE: i32 = 36;
    pub const HAS_MODELLING_RULE: i32 = 37;
    pub const HAS_ENCODING: i32 = 38;
    pub const HAS_DESCRIPTION: i32 = 39;
    pub const HAS_TYPE_DEFINITION: i32 = 40;
    pub const GENERATES_EVENT: i32 = 41;
    pub const AGGREGATES: i32 = 44;
    pub const HAS_SUBTYPE: i32 = 45;
    pub const HAS_PROPERTY: i32 = 46;
    pub const HAS_COMPONENT: i32 = 47;
    pub const HAS_NOTIFIER: i32 = 48;
    pub const HAS_ORDERED_COMPONENT: i32 = 49;
    pub const HAS_MODEL_PARENT: i32 = 50;
    pub const HAS_HISTORICAL_CONFIGURATION: i32 = 56;
    /// Builder back-reference to the parent object.
    pub const BUILDER_PARENT: i32 = 334;

    const NAMES: &[(i32, &str)] = &[
        (TO_PARENT, "toParent"),
        (REFERENCES, "References"),
        (NON_HIERARCHICAL_REFERENCES, "NonHierarchicalReferences"),
        (HIERARCHICAL_REFERENCES, "HierarchicalReferences"),
        (HAS_CHILD, "HasChild"),
        (ORGANIZES, "Organizes"),
        (HAS_EVENT_SOURCE, "HasEventSource"),
        (HAS_MODELLING_RULE, "HasModellingRule"),
        (HAS_ENCODING, "HasEncoding"),
        (HAS_DESCRIPTION, "HasDescription"),
        (HAS_TYPE_DEFINITION, "HasTypeDefinition"),
        (GENERATES_EVENT, "GeneratesEvent"),
        (AGGREGATES, "Aggregates"),
        (HAS_SUBTYPE, "HasSubtype"),
        (HAS_PROPERTY, "HasProperty"),
        (HAS_COMPONENT, "HasComponent"),
        (HAS_NOTIFIER, "HasNotifier"),
        (HAS_ORDERED_COMPONENT, "HasOrderedComponent"),
        (HAS_MODEL_PARENT, "HasModelParent"),
        (HAS_HISTORICAL_CONFIGURATION, "HasHistoricalConfiguration"),
    ];

    const HIERARCHICAL: &[i32] = &[
        HAS_CHILD,
        AGGREGATES,
        HAS_COMPONENT,
        HAS_ORDERED_COMPONENT,
        HAS_HISTORICAL_CONFIGURATION,
        HAS_PROPERTY,
        HAS_SUBTYPE,
        HAS_EVENT_SOURCE,
        HAS_NOTIFIER,
        ORGANIZES,
    ];

    pub fn name(id: i32) -> Option<&'static str> {
        NAMES.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
    }

    pub fn from_name(name: &str) -> Option<i32> {
        NAMES.iter().find(|(_, n)| *n == name).map(|(i, _)| *i)
    }

    /// Human readable name, falling back to the numeric id.
    pub fn display(id: i32) -> String {
        name(id).map(str::to_string).unwrap_or_else(|| id.to_string())
    }

    pub fn is_hierarchical(id: i32) -> bool {
        HIERARCHICAL.contains(&id)
    }
}

/// Built-in data types, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    DateTime,
    Guid,
    ByteString,
    XmlElement,
    NodeId,
    ExpandedNodeId,
    StatusCode,
    QualifiedName,
    LocalizedText,
    ExtensionObject,
    DataValue,
    Variant,
    DiagnosticInfo,
}

impl DataType {
    pub const ALL: [DataType; 26] = [
        DataType::Null,
        DataType::Boolean,
        DataType::SByte,
        DataType::Byte,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float,
        DataType::Double,
        DataType::String,
        DataType::DateTime,
        DataType::Guid,
        DataType::ByteString,
        DataType::XmlElement,
        DataType::NodeId,
        DataType::ExpandedNodeId,
        DataType::StatusCode,
        DataType::QualifiedName,
        DataType::LocalizedText,
        DataType::ExtensionObject,
        DataType::DataValue,
        DataType::Variant,
        DataType::DiagnosticInfo,
    ];

    pub fn value(self) -> u32 {
        Self::ALL.iter().position(|d| *d == self).unwrap_or(0) as u32
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Shape of a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayType {
    Scalar,
    Array,
    Matrix,
}

impl ArrayType {
    /// Maps a value rank attribute to a shape.
    pub fn from_value_rank(rank: i32) -> Self {
        match rank {
            r if r < 0 => ArrayType::Scalar,
            0 | 1 => ArrayType::Array,
            _ => ArrayType::Matrix,
        }
    }
}

/// Status codes the synchronization core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Good,
    BadNodeIdUnknown,
    BadUserAccessDenied,
    BadNotWritable,
    BadTypeMismatch,
    Bad(u32),
}

impl StatusCode {
    pub fn is_good(self) -> bool {
        self == StatusCode::Good
    }

    /// The remote object is locked by another editor or its datasource is offline.
    pub fn is_not_writable(self) -> bool {
        matches!(
            self,
            StatusCode::BadUserAccessDenied | StatusCode::BadNotWritable
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Bad(code) => write!(f, "Bad(0x{:08X})", code),
            other => write!(f, "{:?}", other),
        }
    }
}
