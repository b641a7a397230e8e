//! Dependency-gated tree walkers
//!
//! `NodeBrowser` walks the server hierarchy, `SourceBrowser` walks a source directory. Both hand
//! every node to a `NodeHandler` exactly once, after all of the node's blocking reference targets
//! were handled, and only schedule a node's children once the node itself was handled.

pub mod dependencies;
pub mod node_browser;
pub mod source_browser;

use crate::error::{BranchFailure, SyncError};
use crate::model::{Node, NodeId};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error};

pub use dependencies::DependencyTable;
pub use node_browser::NodeBrowser;
pub use source_browser::SourceBrowser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    /// Run the transformer pipeline on the node.
    pub transform: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self { transform: true }
    }
}

/// Receives every fully resolved node.
///
/// The returned node is the snapshot the node's children are attached to, so renames applied by
/// the handler show up in the children's paths.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Turns a file node into the node `handle_node` receives, `None` if it is suppressed.
    /// `SourceBrowser` claims the prepared id before handling, so an id is handled at most once.
    async fn prepare_node(
        &self,
        node: Node,
        _options: HandleOptions,
    ) -> Result<Option<Node>, SyncError> {
        Ok(Some(node))
    }

    async fn handle_node(&self, node: Node, options: HandleOptions) -> Result<Node, SyncError>;
}

/// Which reference targets take part in dependency gating.
///
/// Ignore and external patterns are regular expressions anchored at the start of the id, so plain
/// ids act as prefixes.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Requested root ids.
    pub roots: Vec<String>,
    ignore: Option<Regex>,
    external: Option<Regex>,
}

fn prefix_pattern(patterns: &[String]) -> Result<Option<Regex>, SyncError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("^({})", patterns.join("|")))
        .map(Some)
        .map_err(|e| SyncError::Config(format!("Invalid node pattern: {}", e)))
}

impl NodeFilter {
    pub fn new(roots: Vec<String>) -> Self {
        Self {
            roots,
            ..Self::default()
        }
    }

    /// Ids that are neither browsed nor waited upon.
    pub fn with_ignored(mut self, patterns: &[String]) -> Result<Self, SyncError> {
        self.ignore = prefix_pattern(patterns)?;
        Ok(self)
    }

    /// Ids that are never waited upon.
    pub fn with_external(mut self, patterns: &[String]) -> Result<Self, SyncError> {
        self.external = prefix_pattern(patterns)?;
        Ok(self)
    }

    pub fn is_ignored(&self, id: &NodeId) -> bool {
        match (id.as_str(), &self.ignore) {
            (Some(value), Some(pattern)) => pattern.is_match(value),
            _ => false,
        }
    }

    /// Standard (numeric) nodes and configured external ids.
    pub fn is_external(&self, id: &NodeId) -> bool {
        match (id.as_str(), &self.external) {
            (Some(value), Some(pattern)) => pattern.is_match(value),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// `true` if `id` is one of the roots or lies below one.
    pub fn in_roots(&self, id: &NodeId) -> bool {
        let Some(value) = id.as_str() else {
            return false;
        };
        self.roots.iter().any(|root| {
            value == root
                || value
                    .strip_prefix(root.as_str())
                    .map(|rest| rest.starts_with('.') || rest.starts_with('/'))
                    .unwrap_or(false)
        })
    }

    /// Targets a node has to wait for.
    pub fn blocks(&self, id: &NodeId) -> bool {
        !self.is_external(id) && !self.is_ignored(id)
    }
}

/// Knobs shared by both browsers.
#[derive(Debug, Clone)]
pub struct BrowseOptions {
    pub concurrency: usize,
    /// Keep going after branch failures and report them instead of rejecting.
    pub continue_on_failure: bool,
    pub handle: HandleOptions,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::concurrency::DEFAULT_WIDTH,
            continue_on_failure: false,
            handle: HandleOptions::default(),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseReport {
    /// Nodes handed to the handler successfully.
    pub processed: usize,
    /// Branches abandoned along the way (only with continue-on-failure).
    pub failures: Vec<BranchFailure>,
}

/// Error bookkeeping shared by both drivers: keeps the first fatal error and collects branch
/// failures.
#[derive(Debug, Default)]
pub(crate) struct RunErrors {
    first: Option<SyncError>,
    pub(crate) failures: Vec<BranchFailure>,
}

impl RunErrors {
    /// Records `error` for `node_id`. Returns `true` if the run has to stop.
    pub(crate) fn record(&mut self, node_id: &str, error: SyncError, continue_on_failure: bool) -> bool {
        if self.first.is_some() {
            debug!(node_id, error = %error, "Additional error");
            return false;
        }
        if error.is_branch_local(continue_on_failure) {
            if continue_on_failure {
                error!("FAILURE: {}", error);
            } else {
                error!(node_id, error = %error, "Abandoned branch");
            }
            self.failures.push(BranchFailure {
                node_id: node_id.to_string(),
                message: error.to_string(),
            });
            return false;
        }
        self.first = Some(error);
        true
    }

    pub(crate) fn failed(&self) -> bool {
        self.first.is_some()
    }

    /// Turns the collected state into the run's result.
    pub(crate) fn finish(self, processed: usize, continue_on_failure: bool) -> Result<BrowseReport, SyncError> {
        if let Some(error) = self.first {
            return Err(error);
        }
        if !self.failures.is_empty() && !continue_on_failure {
            return Err(SyncError::PartialFailure {
                processed,
                failures: self.failures,
            });
        }
        Ok(BrowseReport {
            processed,
            failures: self.failures,
        })
    }
}
