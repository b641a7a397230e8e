//! Dry runs over the source directory
//!
//! Walks the source directory like a push does, runs the push transformers and records the
//! resulting node ids in emission order. Value files are never read and the server is not
//! contacted, so a scan shows what a push would write and in which order.

use crate::browse::{HandleOptions, NodeHandler, SourceBrowser};
use crate::config::SyncConfig;
use crate::error::{BranchFailure, SyncError};
use crate::fs::FileSystem;
use crate::model::Node;
use crate::transform::{Direction, Pipeline, TransformContext, Transformed};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

struct ScanHandler {
    pipeline: Pipeline,
    context: TransformContext,
    emitted: Mutex<Vec<String>>,
}

#[async_trait]
impl NodeHandler for ScanHandler {
    async fn prepare_node(
        &self,
        node: Node,
        options: HandleOptions,
    ) -> Result<Option<Node>, SyncError> {
        if !options.transform {
            return Ok(Some(node));
        }
        Ok(match self.pipeline.apply(node, &self.context).await? {
            Transformed::Pass(transformed) => Some(transformed),
            Transformed::Split { container, .. } => Some(container),
            Transformed::Suppressed => None,
        })
    }

    async fn handle_node(&self, node: Node, _options: HandleOptions) -> Result<Node, SyncError> {
        self.emitted.lock().push(node.node_id());
        Ok(node)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Node ids in the order a push would write them.
    pub node_ids: Vec<String>,
    pub failures: Vec<BranchFailure>,
}

pub async fn run_scan(config: &SyncConfig, fs: Arc<dyn FileSystem>) -> Result<ScanReport, SyncError> {
    config.validate()?;
    let handler = Arc::new(ScanHandler {
        pipeline: Pipeline::standard(config.compact_mapping.clone()),
        context: super::transform_context(config, Direction::FromFilesystem, fs.clone())?,
        emitted: Mutex::new(Vec::new()),
    });
    let report = SourceBrowser::new(fs, handler.clone())
        .with_filter(config.node_filter()?)
        .with_options(config.browse_options())
        .with_read_predicate(Arc::new(|_: &Node| false))
        .browse(&config.source_dir)
        .await?;
    let node_ids = std::mem::take(&mut *handler.emitted.lock());
    Ok(ScanReport {
        node_ids,
        failures: report.failures,
    })
}
