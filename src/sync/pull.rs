//! Pull: server to source directory

use super::rename::RenameFile;
use super::writer::{NodeWriter, WriteOutcome, WriteStats};
use crate::browse::{BrowseReport, HandleOptions, NodeBrowser, NodeHandler};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fs::FileSystem;
use crate::model::Node;
use crate::server::{with_session, SessionScope};
use crate::transform::{materialize_parts, Direction, Pipeline, TransformContext, Transformed};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Transforms browsed nodes and writes them below the source directory.
pub struct PullHandler {
    pipeline: Pipeline,
    context: TransformContext,
    writer: Arc<NodeWriter>,
}

impl PullHandler {
    pub fn new(pipeline: Pipeline, context: TransformContext, writer: Arc<NodeWriter>) -> Self {
        Self {
            pipeline,
            context,
            writer,
        }
    }
}

#[async_trait]
impl NodeHandler for PullHandler {
    async fn handle_node(&self, node: Node, options: HandleOptions) -> Result<Node, SyncError> {
        if !options.transform {
            return Ok(self.writer.write(node).await?.into_node());
        }
        match self.pipeline.apply(node.clone(), &self.context).await? {
            Transformed::Pass(transformed) => Ok(self.writer.write(transformed).await?.into_node()),
            Transformed::Split { container, parts } => match self.writer.write(container).await? {
                WriteOutcome::Written(container) => {
                    for part in materialize_parts(&container, parts) {
                        self.writer.write(part).await?;
                    }
                    Ok(container)
                }
                WriteOutcome::Skipped(container) => Ok(container),
            },
            Transformed::Suppressed => Ok(node),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOptions {
    /// Drop rename entries that were not used during the run.
    pub clean: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    pub browse: BrowseReport,
    pub files: WriteStats,
    /// Identity conflicts recorded in the rename file.
    pub conflicts: usize,
}

/// Pulls the configured nodes into the source directory.
pub async fn run_pull(
    config: &SyncConfig,
    scope: &SessionScope,
    fs: Arc<dyn FileSystem>,
    options: PullOptions,
) -> Result<PullReport, SyncError> {
    config.validate()?;
    let rename = RenameFile::load(fs.as_ref(), &config.rename_file).await?;
    let writer = Arc::new(
        NodeWriter::new(fs.clone(), &config.source_dir, rename).with_checksums(config.checksums),
    );
    let handler = Arc::new(PullHandler::new(
        Pipeline::standard(config.compact_mapping.clone()),
        super::transform_context(config, Direction::FromDb, fs)?,
        writer.clone(),
    ));
    let filter = config.node_filter()?;
    let roots = config.root_ids();

    let browse = with_session(scope, |session| async move {
        NodeBrowser::new(session, handler)
            .with_filter(filter)
            .with_options(config.browse_options())
            .preserve_sort_order(config.preserve_sort_order_nodes)
            .browse(&roots)
            .await
    })
    .await?;

    writer.save_rename_file(options.clean).await?;
    let report = PullReport {
        browse,
        files: writer.stats(),
        conflicts: writer.conflicts(),
    };
    info!(
        processed = report.browse.processed,
        written = report.files.files_written,
        unchanged = report.files.files_unchanged,
        conflicts = report.conflicts,
        "Pull finished"
    );
    Ok(report)
}
