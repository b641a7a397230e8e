//! Transformer pipeline
//!
//! A stage returns a `Transformed` outcome instead of mutating a shared context: the node is
//! passed on, split into a container plus part files, or suppressed. Pulling runs the stages in
//! order, pushing runs them in reverse.

pub mod display;
pub mod mapping;
pub mod script;
pub mod split;
pub mod xml;

use crate::error::SyncError;
use crate::fs::FileSystem;
use crate::model::{Node, Variant};
use async_trait::async_trait;
use semver::Version;
use std::sync::Arc;
use tracing::trace;

pub use display::DisplayTransformer;
pub use mapping::MappingTransformer;
pub use script::ScriptTransformer;
pub use split::{SplitPart, Splitting, SplittingTransformer};
pub use xml::XmlOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromDb,
    FromFilesystem,
}

/// Shared, read-only state handed to every stage.
#[derive(Clone)]
pub struct TransformContext {
    pub direction: Direction,
    /// The server version; `None` means a current server.
    pub server_version: Option<Version>,
    pub fs: Arc<dyn FileSystem>,
    pub xml: XmlOptions,
}

impl TransformContext {
    pub fn new(direction: Direction, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            direction,
            server_version: None,
            fs,
            xml: XmlOptions::default(),
        }
    }

    /// Whether the server is at least `major.minor.patch`.
    pub fn server_at_least(&self, major: u64, minor: u64, patch: u64) -> bool {
        match &self.server_version {
            Some(version) => *version >= Version::new(major, minor, patch),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Pass(Node),
    /// The container plus the part files it was split into.
    Split { container: Node, parts: Vec<SplitPart> },
    Suppressed,
}

impl Transformed {
    fn into_parts(self) -> Option<(Node, Vec<SplitPart>)> {
        match self {
            Transformed::Pass(node) => Some((node, Vec::new())),
            Transformed::Split { container, parts } => Some((container, parts)),
            Transformed::Suppressed => None,
        }
    }
}

#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform_from_db(
        &self,
        node: Node,
        _context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        Ok(Transformed::Pass(node))
    }

    async fn transform_from_filesystem(
        &self,
        node: Node,
        _context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        Ok(Transformed::Pass(node))
    }

    /// Whether a file node's value file should be read. `None` leaves the decision to other
    /// stages.
    fn read_node_file(&self, _node: &Node) -> Option<bool> {
        None
    }
}

/// An ordered list of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Transformer>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Transformer>>) -> Self {
        Self { stages }
    }

    /// Display and script splitting followed by the mapping stage.
    pub fn standard(compact_mapping: Vec<u32>) -> Self {
        Self::new(vec![
            Arc::new(Splitting(DisplayTransformer)),
            Arc::new(Splitting(ScriptTransformer::server_script())),
            Arc::new(Splitting(ScriptTransformer::quick_dynamic())),
            Arc::new(Splitting(ScriptTransformer::display_script())),
            Arc::new(MappingTransformer::new(compact_mapping)),
        ])
    }

    /// Runs every stage for the context's direction. Parts collected along the way are returned
    /// with the container; parts are never transformed again.
    pub async fn apply(&self, node: Node, context: &TransformContext) -> Result<Transformed, SyncError> {
        let stages: Box<dyn Iterator<Item = &Arc<dyn Transformer>> + Send> = match context.direction {
            Direction::FromDb => Box::new(self.stages.iter()),
            Direction::FromFilesystem => Box::new(self.stages.iter().rev()),
        };

        let mut current = node;
        let mut parts: Vec<SplitPart> = Vec::new();
        for stage in stages {
            let outcome = match context.direction {
                Direction::FromDb => stage.transform_from_db(current, context).await?,
                Direction::FromFilesystem => stage.transform_from_filesystem(current, context).await?,
            };
            match outcome.into_parts() {
                Some((next, mut added)) => {
                    parts.append(&mut added);
                    current = next;
                }
                None => {
                    trace!(stage = stage.name(), "Node suppressed");
                    return Ok(Transformed::Suppressed);
                }
            }
        }

        if parts.is_empty() {
            Ok(Transformed::Pass(current))
        } else {
            Ok(Transformed::Split {
                container: current,
                parts,
            })
        }
    }

    /// The first stage with an opinion decides. Defaults to reading.
    pub fn read_node_file(&self, node: &Node) -> bool {
        self.stages
            .iter()
            .find_map(|s| s.read_node_file(node))
            .unwrap_or(true)
    }
}

/// Materializes split parts below their (already handled) container.
pub fn materialize_parts(container: &Node, parts: Vec<SplitPart>) -> Vec<Node> {
    let container = Arc::new(container.clone());
    parts
        .into_iter()
        .map(|part| Node::split_part(&container, part.file_name, part.value))
        .collect()
}

/// A string variant holding `text`.
pub(crate) fn text_part(file_name: String, text: impl Into<String>) -> SplitPart {
    SplitPart {
        file_name,
        value: Variant::string(text),
    }
}
