//! Server-side tree walker
//!
//! One driver loop owns every piece of walk state. Jobs on the task pool only talk to the
//! session and the handler and report back with a `Job` value, so state changes never
//! interleave.
//!
//! A node moves through `queued → browsed → (waiting) → pushing → pushed`. It is pushed once all
//! blocking reference targets were pushed, and its children are only created after the push,
//! attached to the snapshot the handler returned.

use super::{BrowseOptions, BrowseReport, DependencyTable, HandleOptions, NodeFilter, NodeHandler, RunErrors};
use crate::concurrency::TaskPool;
use crate::error::SyncError;
use crate::model::node_id::ROOT_FOLDER;
use crate::model::{Node, NodeId, Value};
use crate::server::{BrowseDirection, ReferenceDescription, Session};
use crate::types::{reference_type, ArrayType};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SORT_ORDER_SUFFIX: &str = ".SortOrder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Queued,
    Pushing,
    Pushed,
    Abandoned,
}

enum Job {
    Browsed {
        node: Node,
        result: Result<Vec<ReferenceDescription>, SyncError>,
    },
    Pushed {
        key: String,
        result: Result<Node, SyncError>,
    },
}

/// A node discovered through `reference`, hanging below `parent`.
pub fn browsed_child(reference: &ReferenceDescription, parent: Option<Arc<Node>>) -> Node {
    let mut node = Node::browsed(
        &reference.browse_name,
        reference.target.clone(),
        reference.node_class,
        parent,
    );
    node.references.add(
        reference_type::TO_PARENT,
        NodeId::Numeric(reference.reference_type as u32),
    );
    node
}

pub struct NodeBrowser {
    session: Arc<dyn Session>,
    handler: Arc<dyn NodeHandler>,
    filter: NodeFilter,
    options: BrowseOptions,
    preserve_sort_order: bool,
}

impl NodeBrowser {
    pub fn new(session: Arc<dyn Session>, handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            session,
            handler,
            filter: NodeFilter::default(),
            options: BrowseOptions::default(),
            preserve_sort_order: false,
        }
    }

    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_options(mut self, options: BrowseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn preserve_sort_order(mut self, preserve: bool) -> Self {
        self.preserve_sort_order = preserve;
        self
    }

    /// Walks the subtrees below `roots`, handing every node to the handler once.
    pub async fn browse(&self, roots: &[NodeId]) -> Result<BrowseReport, SyncError> {
        let mut filter = self.filter.clone();
        filter.roots = roots.iter().map(ToString::to_string).collect();

        let sources = try_join_all(roots.iter().map(|id| discover_root(self.session.clone(), id.clone()))).await?;
        info!(roots = sources.len(), "Browsing server nodes");

        let mut walk = Walk {
            browser: self,
            filter,
            pool: TaskPool::new(self.options.concurrency),
            status: HashMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            waiting: DependencyTable::new(),
            ensure_handled: BTreeSet::new(),
            errors: RunErrors::default(),
            pushed: 0,
            sort_order_warned: false,
        };
        for node in sources {
            walk.process(node);
        }
        while let Some(job) = walk.pool.next().await {
            walk.complete(job);
        }
        walk.finish()
    }
}

/// Builds the parent chain of a root id by browsing up to the root folder and back down.
async fn discover_root(session: Arc<dyn Session>, id: NodeId) -> Result<Node, SyncError> {
    let mut path: Vec<NodeId> = Vec::new();
    let mut current = id.clone();
    loop {
        let references = session.browse(&current, BrowseDirection::Inverse).await?;
        let parent = references
            .into_iter()
            .find(|r| reference_type::is_hierarchical(r.reference_type))
            .ok_or_else(|| SyncError::transport(id.to_string(), format!("Unable to find parent node of {}", current)))?;
        path.insert(0, parent.target.clone());
        if parent.target == NodeId::Numeric(ROOT_FOLDER) {
            break;
        }
        current = parent.target;
    }

    let mut node: Option<Node> = None;
    for (index, ancestor) in path.iter().enumerate() {
        let next = path.get(index + 1).unwrap_or(&id);
        let references = session.browse(ancestor, BrowseDirection::Forward).await?;
        let reference = references
            .iter()
            .find(|r| &r.target == next)
            .ok_or_else(|| SyncError::transport(id.to_string(), format!("Unable to find {} below {}", next, ancestor)))?;
        node = Some(browsed_child(reference, node.map(Arc::new)));
    }
    node.ok_or_else(|| SyncError::Invariant(format!("Empty path for {}", id)))
}

/// Reads a variable's value, falling back to its type attributes when it has none.
async fn read_value(session: &dyn Session, node: &mut Node) -> Result<(), SyncError> {
    if !node.is_variable() {
        return Ok(());
    }
    let Some(id) = node.server_id().cloned() else {
        return Ok(());
    };
    let read = session.read_value(&id).await?;
    if !read.status.is_good() {
        return Err(SyncError::Transport {
            node_id: Some(id.to_string()),
            status: Some(read.status),
            message: format!("Error reading {}: {}", id, read.status),
        });
    }
    match read.value {
        Some(mut variant) => {
            if id.to_string().ends_with(SORT_ORDER_SUFFIX) {
                prune_sort_order(node, &mut variant.value);
            }
            node.value.set(variant);
        }
        None => {
            let (data_type, value_rank) = session.read_type_info(&id).await?;
            node.value.data_type = Some(data_type);
            node.value.array_type = Some(if value_rank < 0 {
                ArrayType::Scalar
            } else {
                ArrayType::Array
            });
        }
    }
    Ok(())
}

/// Drops ordering entries whose sibling no longer exists.
fn prune_sort_order(node: &Node, value: &mut Value) {
    let Value::Array(entries) = value else {
        return;
    };
    let siblings: Vec<&str> = node
        .parent
        .as_ref()
        .map(|p| p.child_names().iter().map(String::as_str).filter(|n| *n != "SortOrder").collect())
        .unwrap_or_default();

    let names: Vec<String> = entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Structured(json) => json.get("name").and_then(|n| n.as_str()).map(str::to_string),
            Value::Text(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    let (existing, removed): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|name| siblings.contains(&name.as_str()));

    if !removed.is_empty() {
        *entries = existing
            .into_iter()
            .map(|name| Value::Structured(json!({ "namespaceIndex": 1, "name": name })))
            .collect();
        warn!(
            "Removed {} invalid references from '{}'",
            removed.len(),
            node.key()
        );
    }
}

struct Walk<'a> {
    browser: &'a NodeBrowser,
    filter: NodeFilter,
    pool: TaskPool<Job>,
    status: HashMap<String, Status>,
    /// First parent each child was discovered below.
    parents: HashMap<String, String>,
    /// Child references kept until their parent was pushed.
    children: HashMap<String, Vec<ReferenceDescription>>,
    waiting: DependencyTable<Node>,
    /// Referenced nodes in the requested roots that have to be pushed before the run ends.
    ensure_handled: BTreeSet<String>,
    errors: RunErrors,
    pushed: usize,
    sort_order_warned: bool,
}

impl<'a> Walk<'a> {
    fn process(&mut self, node: Node) {
        let key = node.key();
        if self.status.contains_key(&key) {
            return;
        }
        self.status.insert(key, Status::Queued);

        let session = self.browser.session.clone();
        self.pool.add(
            async move {
                let result = match node.server_id() {
                    Some(id) => session.browse(id, BrowseDirection::Forward).await,
                    None => Ok(Vec::new()),
                };
                Job::Browsed { node, result }
            }
            .boxed(),
        );
    }

    fn push(&mut self, node: Node) {
        let key = node.key();
        match self.status.get(&key) {
            Some(Status::Pushing) | Some(Status::Pushed) => {
                let error = SyncError::Invariant(format!("Prevented duplicate handling of {}", key));
                self.fail(&key, error);
                return;
            }
            _ => {}
        }
        self.status.insert(key.clone(), Status::Pushing);
        let job = self.push_job(key, node);
        self.pool.add(job);
    }

    fn push_job(&self, key: String, mut node: Node) -> BoxFuture<'static, Job> {
        let session = self.browser.session.clone();
        let handler = self.browser.handler.clone();
        let options: HandleOptions = self.browser.options.handle;
        async move {
            let result = async {
                read_value(session.as_ref(), &mut node).await?;
                handler.handle_node(node, options).await
            }
            .await;
            Job::Pushed { key, result }
        }
        .boxed()
    }

    fn complete(&mut self, job: Job) {
        match job {
            Job::Browsed { node, result } => match result {
                Ok(references) => self.browsed(node, references),
                Err(error) => {
                    let key = node.key();
                    self.fail(&key, error);
                }
            },
            Job::Pushed { key, result } => match result {
                Ok(node) => self.pushed(key, node),
                Err(error) => self.fail(&key, error),
            },
        }
    }

    /// Splits browse results into children and references, then gates the node.
    fn browsed(&mut self, mut node: Node, references: Vec<ReferenceDescription>) {
        let key = node.key();
        let parent_id = node.parent.as_ref().and_then(|p| p.server_id().cloned());
        let mut children = Vec::new();

        for reference in references {
            let target = &reference.target;
            let target_key = target.to_string();
            let kind = reference.reference_type;
            let ignored = self.filter.is_ignored(target);
            let external = self.filter.is_external(target);

            if reference_type::is_hierarchical(kind) && !ignored && !external {
                // Frequently shared between nodes.
                if kind == reference_type::HAS_HISTORICAL_CONFIGURATION {
                    node.references.add(kind, target.clone());
                    continue;
                }

                if target_key.ends_with(SORT_ORDER_SUFFIX) && !self.browser.preserve_sort_order {
                    if !self.sort_order_warned {
                        warn!(
                            "Skipped pulling an atvise builder sort order node.\n - Reason: These nodes are not consistent across pulls.\n - You can force pulling them by setting Atviseproject.preserveSortOrderNodes."
                        );
                        self.sort_order_warned = true;
                    }
                    continue;
                }

                if !target.is_descendant_of(&key) {
                    node.references.add(kind, target.clone());
                    let handled = matches!(self.status.get(&target_key), Some(Status::Pushed));
                    if !handled && self.filter.in_roots(target) {
                        self.ensure_handled.insert(target_key);
                    }
                    continue;
                }

                if let Some(first) = self.parents.get(&target_key) {
                    if first != &key {
                        warn!(
                            "'{}' was discovered as a child node of both '{}' and '{}'.\n  - Reference type (to the latter): {} ({})",
                            target_key,
                            first,
                            key,
                            reference_type::display(kind),
                            kind
                        );
                    }
                    continue;
                }
                self.parents.insert(target_key, key.clone());
                children.push(reference);
            } else if kind != reference_type::HAS_MODEL_PARENT {
                if kind == reference_type::BUILDER_PARENT && parent_id.as_ref() == Some(target) {
                    continue;
                }
                if ignored {
                    debug!(
                        "Ignored reference from {} ({}) to {}",
                        key,
                        reference_type::display(kind),
                        target_key
                    );
                } else {
                    node.references.add(kind, target.clone());
                }
            }
        }

        node.set_child_names(children.iter().map(|c| c.browse_name.clone()).collect());
        self.children.insert(key.clone(), children);

        let pending = self.pending_dependencies(&node, &key);
        let settled: Vec<String> = node
            .references
            .iter()
            .map(|(_, target)| target.to_string())
            .filter(|target| !pending.contains_key(target))
            .collect();
        for target in settled {
            node.references.resolve_target(&target);
        }
        if let Some(node) = self.waiting.register_waiter(key, node, pending) {
            self.push(node);
        }
    }

    fn pending_dependencies(&self, node: &Node, key: &str) -> BTreeMap<String, String> {
        let mut pending = BTreeMap::new();
        for (kind, target) in node.references.iter() {
            let target_key = target.to_string();
            if target_key == key || !self.filter.blocks(target) {
                continue;
            }
            if matches!(self.status.get(&target_key), Some(Status::Pushed)) {
                continue;
            }
            pending
                .entry(target_key)
                .or_insert_with(|| reference_type::display(kind));
        }
        pending
    }

    fn pushed(&mut self, key: String, node: Node) {
        self.status.insert(key.clone(), Status::Pushed);
        self.pushed += 1;
        self.ensure_handled.remove(&key);
        if self.pool.is_paused() {
            return;
        }

        let parent = Arc::new(node);
        for reference in self.children.remove(&key).unwrap_or_default() {
            self.process(browsed_child(&reference, Some(parent.clone())));
        }
        for mut ready in self.waiting.resolve(&key) {
            ready.references.resolve_target(&key);
            self.push(ready);
        }
    }

    fn fail(&mut self, key: &str, error: SyncError) {
        if self.errors.record(key, error, self.browser.options.continue_on_failure) {
            self.pool.pause_and_clear();
            return;
        }
        if self.errors.failed() {
            return;
        }
        self.abandon(key);
    }

    /// Gives up a branch and everything waiting for it.
    fn abandon(&mut self, key: &str) {
        self.status.insert(key.to_string(), Status::Abandoned);
        self.children.remove(key);
        for waiter in self.waiting.fail(key) {
            let error = SyncError::transform(waiter.clone(), format!("Depends on failed node {}", key));
            self.errors
                .record(&waiter, error, self.browser.options.continue_on_failure);
            self.abandon(&waiter);
        }
    }

    fn finish(self) -> Result<BrowseReport, SyncError> {
        let continue_on_failure = self.browser.options.continue_on_failure;
        if self.errors.failed() {
            return self.errors.finish(self.pushed, continue_on_failure);
        }
        if !self.waiting.is_empty() {
            return Err(SyncError::UnresolvedReferences(self.waiting.unresolved_edges()));
        }
        let unhandled: Vec<String> = self
            .ensure_handled
            .iter()
            .filter(|k| self.status.get(*k) != Some(&Status::Abandoned))
            .cloned()
            .collect();
        if !unhandled.is_empty() {
            return Err(SyncError::UnhandledReferences(unhandled));
        }
        if self
            .status
            .values()
            .any(|s| matches!(s, Status::Queued | Status::Pushing))
        {
            return Err(SyncError::Invariant(
                "A node was processed, but not pushed".to_string(),
            ));
        }
        self.errors.finish(self.pushed, continue_on_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Variant;
    use crate::server::{MockSession, ReadResult};
    use crate::types::{NodeClass, StatusCode};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn reference(kind: i32, target: &str, class: NodeClass) -> ReferenceDescription {
        let target = match target.parse::<u32>() {
            Ok(numeric) => NodeId::Numeric(numeric),
            Err(_) => NodeId::string(target),
        };
        let browse_name = target.browse_name().unwrap_or("Objects").to_string();
        ReferenceDescription {
            reference_type: kind,
            target,
            node_class: class,
            browse_name,
        }
    }

    /// A server with `AGENT` below the objects folder and the given forward listings.
    fn server(listings: Vec<(&'static str, Vec<ReferenceDescription>)>) -> MockSession {
        let mut forward: HashMap<String, Vec<ReferenceDescription>> = listings
            .into_iter()
            .map(|(id, refs)| (id.to_string(), refs))
            .collect();
        forward.insert("84".to_string(), vec![reference(reference_type::ORGANIZES, "85", NodeClass::Object)]);
        forward.insert(
            "85".to_string(),
            vec![reference(reference_type::ORGANIZES, "AGENT", NodeClass::Object)],
        );

        let mut session = MockSession::new();
        session.expect_browse().returning(move |id, direction| {
            Ok(match (direction, id.to_string().as_str()) {
                (BrowseDirection::Inverse, "AGENT") => {
                    vec![reference(reference_type::ORGANIZES, "85", NodeClass::Object)]
                }
                (BrowseDirection::Inverse, "85") => {
                    vec![reference(reference_type::ORGANIZES, "84", NodeClass::Object)]
                }
                (BrowseDirection::Inverse, _) => Vec::new(),
                (BrowseDirection::Forward, key) => forward.get(key).cloned().unwrap_or_default(),
            })
        });
        session.expect_read_value().returning(|_| {
            Ok(ReadResult {
                value: Some(Variant::string("value")),
                status: StatusCode::Good,
            })
        });
        session
    }

    #[derive(Default)]
    struct Recorder {
        handled: Mutex<Vec<Node>>,
    }

    #[async_trait]
    impl NodeHandler for Recorder {
        async fn handle_node(&self, node: Node, _options: HandleOptions) -> Result<Node, SyncError> {
            self.handled.lock().push(node.clone());
            Ok(node)
        }
    }

    impl Recorder {
        fn keys(&self) -> Vec<String> {
            self.handled.lock().iter().map(Node::key).collect()
        }
    }

    async fn run(
        session: MockSession,
        filter: NodeFilter,
    ) -> (Arc<Recorder>, Result<BrowseReport, SyncError>) {
        let recorder = Arc::new(Recorder::default());
        let browser = NodeBrowser::new(Arc::new(session), recorder.clone()).with_filter(filter);
        let result = browser.browse(&[NodeId::string("AGENT")]).await;
        (recorder, result)
    }

    #[tokio::test]
    async fn test_dependencies_are_pushed_first() {
        let session = server(vec![
            (
                "AGENT",
                vec![
                    reference(reference_type::HAS_COMPONENT, "AGENT.A", NodeClass::Object),
                    reference(reference_type::HAS_COMPONENT, "AGENT.B", NodeClass::Object),
                ],
            ),
            (
                "AGENT.A",
                vec![reference(reference_type::HAS_TYPE_DEFINITION, "AGENT.B", NodeClass::ObjectType)],
            ),
        ]);
        let (recorder, result) = run(session, NodeFilter::default()).await;
        assert_eq!(result.unwrap().processed, 3);

        let keys = recorder.keys();
        let a = keys.iter().position(|k| k == "AGENT.A").unwrap();
        let b = keys.iter().position(|k| k == "AGENT.B").unwrap();
        assert!(b < a);
        assert_eq!(keys[0], "AGENT");

        let handled = recorder.handled.lock();
        let node_a = handled.iter().find(|n| n.key() == "AGENT.A").unwrap();
        assert!(node_a.references.unresolved().is_empty());
        assert_eq!(node_a.references.resolved().len(), node_a.references.canonical().len());
        assert!(node_a.references.is_partition_consistent());
    }

    #[tokio::test]
    async fn test_ignored_target_does_not_block() {
        let session = server(vec![
            (
                "AGENT",
                vec![
                    reference(reference_type::HAS_COMPONENT, "AGENT.A", NodeClass::Object),
                    reference(reference_type::HAS_COMPONENT, "AGENT.IGNORED", NodeClass::Object),
                ],
            ),
            (
                "AGENT.A",
                vec![reference(reference_type::HAS_TYPE_DEFINITION, "AGENT.IGNORED", NodeClass::Object)],
            ),
        ]);
        let filter = NodeFilter::default()
            .with_ignored(&["AGENT.IGNORED".to_string()])
            .unwrap();
        let (recorder, result) = run(session, filter).await;
        assert_eq!(result.unwrap().processed, 2);
        assert!(!recorder.keys().contains(&"AGENT.IGNORED".to_string()));
    }

    #[tokio::test]
    async fn test_undiscovered_target_rejects_with_edge() {
        let session = server(vec![
            (
                "AGENT",
                vec![reference(reference_type::HAS_COMPONENT, "AGENT.A", NodeClass::Object)],
            ),
            (
                "AGENT.A",
                vec![reference(reference_type::HAS_TYPE_DEFINITION, "OTHER.C", NodeClass::ObjectType)],
            ),
        ]);
        let (_, result) = run(session, NodeFilter::default()).await;
        match result.unwrap_err() {
            SyncError::UnresolvedReferences(edges) => {
                assert_eq!(edges.len(), 1);
                assert_eq!(edges[0].to_string(), "AGENT.A → (HasTypeDefinition) → OTHER.C");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_first_parent_wins() {
        let session = server(vec![
            (
                "AGENT",
                vec![
                    reference(reference_type::HAS_COMPONENT, "AGENT.B", NodeClass::Object),
                    reference(reference_type::ORGANIZES, "AGENT.B.X", NodeClass::Object),
                ],
            ),
            (
                "AGENT.B",
                vec![reference(reference_type::HAS_COMPONENT, "AGENT.B.X", NodeClass::Object)],
            ),
        ]);
        let (recorder, result) = run(session, NodeFilter::default()).await;
        assert_eq!(result.unwrap().processed, 3);
        let keys = recorder.keys();
        assert_eq!(keys.iter().filter(|k| *k == "AGENT.B.X").count(), 1);
        let parent = recorder
            .handled
            .lock()
            .iter()
            .find(|n| n.key() == "AGENT.B.X")
            .and_then(|n| n.parent.as_ref().map(|p| p.key()))
            .unwrap();
        assert_eq!(parent, "AGENT");
    }

    #[tokio::test]
    async fn test_sort_order_nodes_are_skipped() {
        let session = server(vec![(
            "AGENT",
            vec![
                reference(reference_type::HAS_COMPONENT, "AGENT.A", NodeClass::Object),
                reference(reference_type::HAS_PROPERTY, "AGENT.SortOrder", NodeClass::Variable),
            ],
        )]);
        let (recorder, result) = run(session, NodeFilter::default()).await;
        assert_eq!(result.unwrap().processed, 2);
        assert_eq!(recorder.keys(), vec!["AGENT", "AGENT.A"]);
    }

    #[tokio::test]
    async fn test_historical_configuration_is_a_reference() {
        let session = server(vec![(
            "AGENT",
            vec![reference(
                reference_type::HAS_HISTORICAL_CONFIGURATION,
                "AGENT.HISTORY",
                NodeClass::Object,
            )],
        )]);
        let (recorder, result) = run(session, NodeFilter::default()).await;
        // Never discovered as a child, so the reference cannot resolve.
        assert!(matches!(result, Err(SyncError::UnresolvedReferences(_))));
        assert!(recorder.keys().is_empty());
    }

    #[test]
    fn test_sort_order_pruning_keeps_existing_siblings() {
        let mut parent = Node::browsed("AGENT", NodeId::string("AGENT"), NodeClass::Object, None);
        parent.set_child_names(vec!["A".to_string(), "SortOrder".to_string()]);
        let node = Node::browsed(
            "SortOrder",
            NodeId::string("AGENT.SortOrder"),
            NodeClass::Variable,
            Some(Arc::new(parent)),
        );
        let mut value = Value::Array(vec![
            Value::Structured(json!({ "namespaceIndex": 1, "name": "A" })),
            Value::Structured(json!({ "namespaceIndex": 1, "name": "Gone" })),
        ]);
        prune_sort_order(&node, &mut value);
        assert_eq!(
            value,
            Value::Array(vec![Value::Structured(json!({ "namespaceIndex": 1, "name": "A" }))])
        );
    }

    #[tokio::test]
    async fn test_handler_failure_stops_the_run() {
        let session = server(vec![(
            "AGENT",
            vec![reference(reference_type::HAS_COMPONENT, "AGENT.A", NodeClass::Object)],
        )]);
        let mut handler = super::super::MockNodeHandler::new();
        handler
            .expect_handle_node()
            .times(1)
            .returning(|node, _| Err(SyncError::transport(node.key(), "connection lost")));

        let browser = NodeBrowser::new(Arc::new(session), Arc::new(handler));
        let err = browser.browse(&[NodeId::string("AGENT")]).await.unwrap_err();
        assert_eq!(err.to_string(), "connection lost");
    }
}
