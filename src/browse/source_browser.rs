//! File-side tree walker
//!
//! Walks a source directory and rebuilds nodes from their definition files. A directory holding
//! a class marker file (`.Object.json`, `.Variable.json`, ...) is a container: the marker is the
//! node, every other entry becomes one of its children. Without a marker the entries are roots of
//! their own, except inside `<name>.inner` directories, which hold the children of the variable
//! `<name>`.
//!
//! Gating works like on the server side, keyed by the node id the handler returns.

use super::{BrowseOptions, BrowseReport, DependencyTable, NodeFilter, NodeHandler, RunErrors};
use crate::concurrency::TaskPool;
use crate::error::SyncError;
use crate::fs::{read_json, EntryKind, FileSystem};
use crate::model::{Definition, FileInfo, Node};
use crate::types::{reference_type, NodeClass};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const INNER_SUFFIX: &str = ".inner";

/// Decides whether a variable's value file is read before the node is handled.
pub type ReadPredicate = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// A directory entry waiting to be visited.
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    name: String,
    parent: Option<Arc<Node>>,
    /// Entries processed once this entry's node was handled.
    children: Vec<Entry>,
}

impl Entry {
    fn new(path: PathBuf) -> Self {
        let name = file_name(&path);
        Self {
            path,
            name,
            parent: None,
            children: Vec::new(),
        }
    }
}

enum Visit {
    Directory(Vec<String>),
    Definition(Definition),
    Stray,
}

enum Job {
    Visited {
        entry: Entry,
        result: Result<Visit, SyncError>,
    },
    Prepared {
        /// Id before transformation, used to release dependents on failure.
        node_id: String,
        /// The node as read, handled in place of a suppressed one.
        original: Node,
        children: Vec<Entry>,
        result: Result<Option<Node>, SyncError>,
    },
    Pushed {
        definition_path: PathBuf,
        /// Id before transformation, used to release dependents on failure.
        node_id: String,
        children: Vec<Entry>,
        result: Result<Node, SyncError>,
    },
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `true` for `.<name>.json` files.
pub fn is_definition_file(name: &str) -> bool {
    name.len() > ".json".len() + 1 && name.starts_with('.') && name.ends_with(".json")
}

/// The node class of a class marker file such as `.ObjectType.json`.
fn container_class(name: &str) -> Option<NodeClass> {
    let class = name.strip_prefix('.')?.strip_suffix(".json")?;
    NodeClass::from_name(class)
}

/// Splits a directory listing into the class marker (if any) and the entries to process.
/// Value files that have a definition file are dropped, `<name>.inner` directories are attached
/// to the entry of `<name>`.
fn classify_directory(directory: &Path, names: &[String]) -> (Option<Entry>, Vec<Entry>) {
    let present: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut container = None;
    let mut entries: Vec<Entry> = Vec::new();
    let mut inner: Vec<(String, Entry)> = Vec::new();

    for name in names {
        let entry = Entry::new(directory.join(name));
        if container_class(name).is_some() {
            container = Some(entry);
            continue;
        }
        if present.contains(format!(".{}.json", name).as_str()) {
            continue;
        }
        if let Some(raw) = name.strip_suffix(INNER_SUFFIX) {
            let definition = format!(".{}.json", raw);
            let owner = if present.contains(definition.as_str()) {
                Some(definition)
            } else if present.contains(raw) {
                Some(raw.to_string())
            } else {
                None
            };
            if let Some(owner) = owner {
                inner.push((owner, entry));
                continue;
            }
        }
        entries.push(entry);
    }

    for (owner, entry) in inner {
        if let Some(target) = entries.iter_mut().find(|e| e.name == owner) {
            target.children.push(entry);
        }
    }
    (container, entries)
}

/// The logical name of a definition file. Class marker files are named after their directory.
fn definition_name(path: &Path) -> String {
    let base = file_name(path);
    let name = base
        .strip_suffix(".json")
        .unwrap_or(&base)
        .trim_start_matches('.')
        .to_string();
    if name.len() >= 4 && NodeClass::from_name(&name).is_some() {
        return path
            .parent()
            .map(file_name)
            .unwrap_or(name);
    }
    name
}

pub struct SourceBrowser {
    fs: Arc<dyn FileSystem>,
    handler: Arc<dyn NodeHandler>,
    filter: NodeFilter,
    options: BrowseOptions,
    read_node_file: ReadPredicate,
}

impl SourceBrowser {
    pub fn new(fs: Arc<dyn FileSystem>, handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            fs,
            handler,
            filter: NodeFilter::default(),
            options: BrowseOptions::default(),
            read_node_file: Arc::new(|_| true),
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

    pub fn with_read_predicate(mut self, predicate: ReadPredicate) -> Self {
        self.read_node_file = predicate;
        self
    }

    /// Walks everything below `path`.
    pub async fn browse(&self, path: &Path) -> Result<BrowseReport, SyncError> {
        self.run(Entry::new(path.to_path_buf())).await
    }

    async fn run(&self, entry: Entry) -> Result<BrowseReport, SyncError> {
        info!(path = %entry.path.display(), "Browsing source files");
        let mut walk = Walk {
            browser: self,
            pool: TaskPool::new(self.options.concurrency),
            claimed: HashSet::new(),
            handling: HashSet::new(),
            pushed: HashSet::new(),
            waiting: DependencyTable::new(),
            errors: RunErrors::default(),
            processed: 0,
        };
        walk.visit(entry);
        while let Some(job) = walk.pool.next().await {
            walk.complete(job);
        }
        walk.finish()
    }
}

struct Walk<'a> {
    browser: &'a SourceBrowser,
    pool: TaskPool<Job>,
    /// Definition files already turned into nodes.
    claimed: HashSet<PathBuf>,
    /// Ids handed to the handler, claimed before handling starts.
    handling: HashSet<String>,
    /// Ids of handled nodes.
    pushed: HashSet<String>,
    waiting: DependencyTable<(Node, Vec<Entry>)>,
    errors: RunErrors,
    processed: usize,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, entry: Entry) {
        let fs = self.browser.fs.clone();
        self.pool.add(
            async move {
                let result = visit_path(fs.as_ref(), &entry.path).await;
                Job::Visited { entry, result }
            }
            .boxed(),
        );
    }

    fn complete(&mut self, job: Job) {
        match job {
            Job::Visited { entry, result } => match result {
                Ok(Visit::Directory(names)) => self.directory(entry, names),
                Ok(Visit::Definition(definition)) => self.definition(entry, definition),
                Ok(Visit::Stray) => warn!("Not a definition file at {}", entry.path.display()),
                Err(error) => {
                    let key = entry.path.display().to_string();
                    self.fail(&key, error);
                }
            },
            Job::Prepared {
                node_id,
                original,
                children,
                result,
            } => match result {
                Ok(Some(node)) => self.prepared(node_id, node, children),
                Ok(None) => self.pushed(original, children),
                Err(error) => self.fail(&node_id, error),
            },
            Job::Pushed {
                definition_path,
                node_id,
                children,
                result,
            } => match result {
                Ok(node) => self.pushed(node, children),
                Err(error) => {
                    debug!(path = %definition_path.display(), "Handling failed");
                    self.fail(&node_id, error);
                }
            },
        }
    }

    fn directory(&mut self, entry: Entry, names: Vec<String>) {
        let (container, entries) = classify_directory(&entry.path, &names);

        if let Some(mut container) = container {
            container.children = entries;
            container.parent = entry.parent;
            self.visit(container);
            return;
        }

        let inherit = entry.name.ends_with(INNER_SUFFIX);
        for mut child in entries {
            child.parent = if inherit { entry.parent.clone() } else { None };
            self.visit(child);
        }
    }

    fn definition(&mut self, entry: Entry, definition: Definition) {
        if !self.claimed.insert(entry.path.clone()) {
            return;
        }
        let name = definition_name(&entry.path);
        let directory = entry.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let info = FileInfo {
            value_path: directory.join(&name),
            definition_path: entry.path.clone(),
        };
        let node = match Node::from_definition(&name, &definition, entry.parent, info) {
            Ok(node) => node,
            Err(error) => {
                let key = entry.path.display().to_string();
                self.fail(&key, error);
                return;
            }
        };

        let key = node.node_id();
        let pending = self.pending_dependencies(&key, &node);
        if let Some(item) = self.waiting.register_waiter(key, (node, entry.children), pending) {
            self.push(item);
        }
    }

    fn pending_dependencies(&self, key: &str, node: &Node) -> BTreeMap<String, String> {
        let mut pending = BTreeMap::new();
        for (kind, target) in node.references.iter() {
            if !self.browser.filter.blocks(target) {
                continue;
            }
            let target_key = target.to_string();
            if target_key == key || self.pushed.contains(&target_key) {
                continue;
            }
            pending
                .entry(target_key)
                .or_insert_with(|| reference_type::display(kind));
        }
        pending
    }

    fn push(&mut self, (node, children): (Node, Vec<Entry>)) {
        let job = self.prepare_job(node, children);
        self.pool.add(job);
    }

    fn prepare_job(&self, mut node: Node, children: Vec<Entry>) -> BoxFuture<'static, Job> {
        let fs = self.browser.fs.clone();
        let handler = self.browser.handler.clone();
        let read = node.is_variable() && (self.browser.read_node_file)(&node);
        let options = self.browser.options.handle;
        async move {
            let node_id = node.node_id();
            if read {
                if let Err(error) = read_value_file(fs.as_ref(), &mut node).await {
                    return Job::Prepared {
                        node_id,
                        original: node,
                        children,
                        result: Err(error),
                    };
                }
            }
            let result = handler.prepare_node(node.clone(), options).await;
            Job::Prepared {
                node_id,
                original: node,
                children,
                result,
            }
        }
        .boxed()
    }

    /// Claims the prepared node's id, then hands it to the handler.
    fn prepared(&mut self, node_id: String, node: Node, children: Vec<Entry>) {
        let id = node.node_id();
        if !self.handling.insert(id.clone()) {
            let error = SyncError::Invariant(format!("Prevented duplicate handling of {}", id));
            self.fail(&id, error);
            return;
        }
        let handler = self.browser.handler.clone();
        let options = self.browser.options.handle;
        let definition_path = node
            .file_info()
            .map(|info| info.definition_path.clone())
            .unwrap_or_default();
        self.pool.add(
            async move {
                let result = handler.handle_node(node, options).await;
                Job::Pushed {
                    definition_path,
                    node_id,
                    children,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn pushed(&mut self, node: Node, children: Vec<Entry>) {
        let id = node.node_id();
        self.pushed.insert(id.clone());
        self.processed += 1;
        if self.pool.is_paused() {
            return;
        }

        let parent = Arc::new(node);
        for mut child in children {
            child.parent = Some(parent.clone());
            self.visit(child);
        }
        for ready in self.waiting.resolve(&id) {
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

    fn abandon(&mut self, key: &str) {
        let mut queue = vec![key.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for waiter in self.waiting.fail(&current) {
                let error = SyncError::transform(waiter.clone(), format!("Depends on failed node {}", current));
                self.errors
                    .record(&waiter, error, self.browser.options.continue_on_failure);
                queue.push(waiter);
            }
        }
    }

    fn finish(self) -> Result<BrowseReport, SyncError> {
        let continue_on_failure = self.browser.options.continue_on_failure;
        if self.errors.failed() {
            return self.errors.finish(self.processed, continue_on_failure);
        }
        if !self.waiting.is_empty() {
            return Err(SyncError::MissingDependencies(self.waiting.pending_targets()));
        }
        self.errors.finish(self.processed, continue_on_failure)
    }
}

async fn visit_path(fs: &dyn FileSystem, path: &Path) -> Result<Visit, SyncError> {
    match fs.stat(path).await? {
        EntryKind::Directory => Ok(Visit::Directory(fs.list_dir(path).await?)),
        EntryKind::File => {
            if !is_definition_file(&file_name(path)) {
                return Ok(Visit::Stray);
            }
            Ok(Visit::Definition(read_json(fs, path).await?))
        }
    }
}

/// Attaches the raw value file contents. Variables whose value lives in a directory (split
/// containers) have nothing to read.
async fn read_value_file(fs: &dyn FileSystem, node: &mut Node) -> Result<(), SyncError> {
    let Some(path) = node.file_info().map(|info| info.value_path.clone()) else {
        return Ok(());
    };
    if let Ok(EntryKind::Directory) = fs.stat(&path).await {
        return Ok(());
    }
    node.value.raw = Some(fs.read_file(&path).await?);
    Ok(())
}
