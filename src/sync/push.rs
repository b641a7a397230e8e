//! Push: source directory to server
//!
//! Every node read back from the source directory is first written directly. Nodes the server
//! does not know yet are created through the create script, and their non-hierarchical
//! references are attached in a second call.

use crate::browse::{BrowseReport, HandleOptions, NodeHandler, SourceBrowser};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fs::FileSystem;
use crate::model::{Node, NodeId};
use crate::server::api::{self, CreateNodeRequest};
use crate::server::{with_session, Session, SessionScope};
use crate::transform::{Direction, Pipeline, TransformContext, Transformed};
use crate::types::{reference_type, StatusCode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one pushed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Updated,
    Created,
    /// The node existed already when the create script ran.
    Existing,
    /// Locked by another editor or not writable.
    Skipped,
    CreateFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub updated: usize,
    pub created: usize,
    pub skipped: usize,
    pub create_failed: usize,
}

impl PushStats {
    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Updated | PushOutcome::Existing => self.updated += 1,
            PushOutcome::Created => self.created += 1,
            PushOutcome::Skipped => self.skipped += 1,
            PushOutcome::CreateFailed => self.create_failed += 1,
        }
    }
}

/// Updates or creates nodes on the server.
pub struct WriteCoordinator {
    session: Arc<dyn Session>,
    stats: Mutex<PushStats>,
}

impl WriteCoordinator {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            stats: Mutex::new(PushStats::default()),
        }
    }

    pub fn stats(&self) -> PushStats {
        *self.stats.lock()
    }

    pub async fn push(&self, node: &Node) -> Result<PushOutcome, SyncError> {
        let outcome = if node.is_variable() {
            self.update(node).await?
        } else {
            self.create(node).await?
        };
        self.stats.lock().record(outcome);
        Ok(outcome)
    }

    async fn update(&self, node: &Node) -> Result<PushOutcome, SyncError> {
        let node_id = node.node_id();
        let variant = node.variant()?;
        let status = self
            .session
            .write_value(&NodeId::string(node_id.as_str()), &variant)
            .await?;

        match status {
            StatusCode::Good => {
                self.ensure_references(node).await?;
                Ok(PushOutcome::Updated)
            }
            status if status.is_not_writable() => {
                warn!(
                    "Error writing node {}\n    - Make sure it is not opened in atvise builder\n    - Make sure the corresponding datasource is connected",
                    node_id
                );
                Ok(PushOutcome::Skipped)
            }
            StatusCode::BadNodeIdUnknown => {
                debug!("Node {} does not exist: Attempting to create it...", node_id);
                self.create(node).await
            }
            status => Err(SyncError::Transport {
                node_id: Some(node_id.clone()),
                status: Some(status),
                message: format!("Error writing node {}: {}", node_id, status),
            }),
        }
    }

    fn create_request(node: &Node) -> Result<CreateNodeRequest, SyncError> {
        let node_id = NodeId::string(node.node_id());
        let parent = match &node.parent {
            Some(parent) => NodeId::string(parent.node_id()),
            None => {
                let parent = node_id
                    .parent()
                    .unwrap_or(NodeId::Numeric(crate::model::node_id::OBJECTS_FOLDER));
                debug!("Assuming {} as parent of {}", parent, node_id);
                parent
            }
        };

        let mut request = CreateNodeRequest::new(&node_id, node.name(), &parent, node.node_class);
        if let Some(type_definition) = node.type_definition() {
            request.type_definition = type_definition.to_protocol_string();
        } else if !node.is_variable() {
            request.type_definition =
                NodeId::Numeric(crate::model::node_id::BASE_OBJECT_TYPE).to_protocol_string();
        }
        request.modelling_rule = node.modelling_rule().map(NodeId::to_protocol_string);
        request.reference = node
            .references
            .get_single(reference_type::TO_PARENT)
            .and_then(|target| match target {
                NodeId::Numeric(kind) => reference_type::name(*kind as i32),
                NodeId::String(name) => reference_type::from_name(name).and(Some(name.as_str())),
            })
            .map(str::to_string);
        if node.is_variable() {
            request = request.with_value(&node.variant()?);
        }
        Ok(request)
    }

    async fn create(&self, node: &Node) -> Result<PushOutcome, SyncError> {
        let request = Self::create_request(node)?;
        let outcome = api::create_node(self.session.as_ref(), &request).await?;

        if outcome.failed {
            warn!("Failed to create node {}", node.node_id());
            return Ok(PushOutcome::CreateFailed);
        }
        self.ensure_references(node).await?;
        if outcome.created {
            debug!("Created node {}", node.node_id());
            Ok(PushOutcome::Created)
        } else {
            Ok(PushOutcome::Existing)
        }
    }

    async fn ensure_references(&self, node: &Node) -> Result<(), SyncError> {
        let references = api::attachable_references(node);
        if references.is_empty() {
            return Ok(());
        }
        let node_id = node.node_id();
        let failed =
            api::add_references(self.session.as_ref(), &NodeId::string(node_id.as_str()), &references)
                .await?;
        if !failed.is_empty() {
            return Err(SyncError::ReferenceAttachment { node_id, failed });
        }
        debug!("Added {} reference(s) to {}", references.len(), node_id);
        Ok(())
    }
}

/// Transforms file nodes and hands them to a `WriteCoordinator`.
pub struct PushHandler {
    pipeline: Pipeline,
    context: TransformContext,
    coordinator: WriteCoordinator,
}

impl PushHandler {
    pub fn new(pipeline: Pipeline, context: TransformContext, coordinator: WriteCoordinator) -> Self {
        Self {
            pipeline,
            context,
            coordinator,
        }
    }

    pub fn stats(&self) -> PushStats {
        self.coordinator.stats()
    }
}

#[async_trait]
impl NodeHandler for PushHandler {
    async fn prepare_node(
        &self,
        node: Node,
        options: HandleOptions,
    ) -> Result<Option<Node>, SyncError> {
        if !options.transform {
            return Ok(Some(node));
        }
        match self.pipeline.apply(node, &self.context).await? {
            Transformed::Pass(transformed) => Ok(Some(transformed)),
            // Combining never splits; parts are pushed as part of their container.
            Transformed::Split { container, .. } => Ok(Some(container)),
            Transformed::Suppressed => Ok(None),
        }
    }

    async fn handle_node(&self, node: Node, _options: HandleOptions) -> Result<Node, SyncError> {
        self.coordinator.push(&node).await?;
        Ok(node)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    pub browse: BrowseReport,
    pub stats: PushStats,
}

/// Pushes the configured source directory.
pub async fn run_push(
    config: &SyncConfig,
    scope: &SessionScope,
    fs: Arc<dyn FileSystem>,
) -> Result<PushReport, SyncError> {
    config.validate()?;
    let pipeline = Pipeline::standard(config.compact_mapping.clone());
    let context = super::transform_context(config, Direction::FromFilesystem, fs.clone())?;
    let filter = config.node_filter()?;
    let options = config.browse_options();

    let report = with_session(scope, |session| async move {
        let handler = Arc::new(PushHandler::new(
            pipeline.clone(),
            context,
            WriteCoordinator::new(session),
        ));
        let predicate_pipeline = pipeline;
        let browser = SourceBrowser::new(fs, handler.clone())
            .with_filter(filter)
            .with_options(options)
            .with_read_predicate(Arc::new(move |node: &Node| {
                predicate_pipeline.read_node_file(node)
            }));
        let browse = browser.browse(&config.source_dir).await?;
        Ok(PushReport {
            browse,
            stats: handler.stats(),
        })
    })
    .await?;

    info!(
        processed = report.browse.processed,
        updated = report.stats.updated,
        created = report.stats.created,
        skipped = report.stats.skipped,
        "Push finished"
    );
    Ok(report)
}
