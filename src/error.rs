//! Error types for pull and push runs
//!
//! A run either finishes with a report or fails with exactly one `SyncError`. Dependency and
//! conflict failures aggregate every offending edge into a single human-readable message.

use crate::types::StatusCode;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A `from → (relationship) → to` edge that never resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEdge {
    pub from: String,
    pub reference_type: String,
    pub to: String,
}

impl fmt::Display for UnresolvedEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → ({}) → {}", self.from, self.reference_type, self.to)
    }
}

/// Position inside a structured document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A branch that was abandoned while the run went on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFailure {
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Error)]
#[error("No {reference_type} reference to {target}")]
pub struct ReferenceNotFoundError {
    pub reference_type: String,
    pub target: String,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{message}")]
    Transport {
        node_id: Option<String>,
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Unable to resolve {} reference(s):\n\n  {}", .0.len(), join_edges(.0))]
    UnresolvedReferences(Vec<UnresolvedEdge>),

    #[error("Some referenced nodes were not handled:\n - {}", .0.join("\n - "))]
    UnhandledReferences(Vec<String>),

    #[error(
        "Some nodes are still waiting for dependencies\n  Missing nodes: {}\n  - Pull these nodes or add them to the ignored ones",
        .0.join(", ")
    )]
    MissingDependencies(Vec<String>),

    #[error("Name conflict: {0}")]
    Conflict(String),

    #[error("{node_id}: {message}{}", .location.map(|l| format!(" ({})", l)).unwrap_or_default())]
    Parse {
        node_id: String,
        message: String,
        location: Option<Location>,
    },

    #[error("{node_id}: {message}")]
    Transform { node_id: String, message: String },

    #[error("Failed to create reference(s) from {node_id} to {}", .failed.join(", "))]
    ReferenceAttachment { node_id: String, failed: Vec<String> },

    #[error(
        "{} of {} node(s) failed:\n - {}",
        .failures.len(),
        .processed + .failures.len(),
        .failures.iter().map(|f| format!("{}: {}", f.node_id, f.message)).collect::<Vec<_>>().join("\n - ")
    )]
    PartialFailure {
        processed: usize,
        failures: Vec<BranchFailure>,
    },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    ReferenceNotFound(#[from] ReferenceNotFoundError),

    #[error("{code}: Error reading {path:?}", code = io_code(.source))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transport(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transport {
            node_id: Some(node_id.into()),
            status: None,
            message: message.into(),
        }
    }

    pub fn transform(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transform {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that only invalidate the node they occurred on.
    ///
    /// Transport errors become branch-local only when the caller asked to continue on failure.
    pub fn is_branch_local(&self, continue_on_failure: bool) -> bool {
        match self {
            SyncError::Parse { .. }
            | SyncError::Transform { .. }
            | SyncError::Conflict(_)
            | SyncError::Json { .. } => true,
            SyncError::Transport { .. }
            | SyncError::ReferenceAttachment { .. }
            | SyncError::Io { .. } => continue_on_failure,
            _ => false,
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            SyncError::Invariant(_) | SyncError::ReferenceNotFound(_)
        )
    }
}

fn join_edges(edges: &[UnresolvedEdge]) -> String {
    edges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

fn io_code(error: &std::io::Error) -> String {
    format!("{:?}", error.kind())
}
