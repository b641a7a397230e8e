//! Node identifiers
//!
//! Project nodes use string ids in namespace 1 (`AGENT.DISPLAYS.Main`), standard nodes use
//! numeric ids in namespace 0 (`85` is the `Objects` folder). Definition files store both forms
//! as plain JSON strings or numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric id of the `Objects` folder.
pub const OBJECTS_FOLDER: u32 = 85;
/// Numeric id of `BaseObjectType`.
pub const BASE_OBJECT_TYPE: u32 = 58;
/// Numeric id of `BaseVariableType`.
pub const BASE_VARIABLE_TYPE: u32 = 62;
/// Numeric id of the `Root` folder.
pub const ROOT_FOLDER: u32 = 84;

/// Children of a resource path that switch back to `.` as separator.
pub const RESOURCE_CHILD_NAMES: [&str; 2] = ["Translate", "Compress"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    Numeric(u32),
    String(String),
}

impl NodeId {
    pub fn string(value: impl Into<String>) -> Self {
        NodeId::String(value.into())
    }

    /// Parses `ns=<n>;i=<v>`, `ns=<n>;s=<v>` or a bare string id.
    pub fn parse(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix("ns=") {
            if let Some((_, identifier)) = rest.split_once(';') {
                if let Some(numeric) = identifier.strip_prefix("i=") {
                    if let Ok(value) = numeric.parse() {
                        return NodeId::Numeric(value);
                    }
                }
                if let Some(string) = identifier.strip_prefix("s=") {
                    return NodeId::String(string.to_string());
                }
            }
        }
        NodeId::String(input.to_string())
    }

    pub fn namespace(&self) -> u16 {
        match self {
            NodeId::Numeric(_) => 0,
            NodeId::String(_) => 1,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NodeId::String(value) => Some(value),
            NodeId::Numeric(_) => None,
        }
    }

    /// Full protocol notation, e.g. `ns=1;s=AGENT`.
    pub fn to_protocol_string(&self) -> String {
        match self {
            NodeId::Numeric(value) => format!("ns=0;i={}", value),
            NodeId::String(value) => format!("ns=1;s={}", value),
        }
    }

    fn last_separator(value: &str) -> char {
        if value.contains('/') {
            '/'
        } else {
            '.'
        }
    }

    /// The parent id derived from the id string, with the well-known root aliases applied.
    pub fn parent(&self) -> Option<NodeId> {
        let value = self.as_str()?;
        match value {
            "AGENT" | "SYSTEM" => return Some(NodeId::Numeric(OBJECTS_FOLDER)),
            "ObjectTypes.PROJECT" => return Some(NodeId::Numeric(BASE_OBJECT_TYPE)),
            "VariableTypes.PROJECT" => return Some(NodeId::Numeric(BASE_VARIABLE_TYPE)),
            _ => {}
        }
        match value.rfind(Self::last_separator(value)) {
            Some(index) if index > 0 => Some(NodeId::String(value[..index].to_string())),
            _ => Some(NodeId::Numeric(OBJECTS_FOLDER)),
        }
    }

    /// The last path segment of a string id.
    pub fn browse_name(&self) -> Option<&str> {
        let value = self.as_str()?;
        let start = value
            .rfind(Self::last_separator(value))
            .map(|i| i + 1)
            .unwrap_or(0);
        Some(&value[start..])
    }

    /// `true` if this id lies strictly below `ancestor` in the id hierarchy.
    pub fn is_descendant_of(&self, ancestor: &str) -> bool {
        match self.as_str() {
            Some(value) => value.len() > ancestor.len() && value.starts_with(ancestor),
            None => false,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Numeric(value) => write!(f, "{}", value),
            NodeId::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::String(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId::String(value)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId::Numeric(value)
    }
}
