//! Pull writer
//!
//! Places a pulled node's definition and value files below the source directory. File systems may
//! be case-insensitive, so two nodes whose paths only differ in case conflict: the second one is
//! not written and recorded in the rename file instead, and everything below it is skipped.

use super::rename::{ConflictRecord, RenameFile};
use crate::coding::encode_variant;
use crate::error::SyncError;
use crate::fs::{join_segments, FileSystem};
use crate::model::Node;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Escapes a node name for use as a path component.
pub fn escape_path_component(name: &str) -> String {
    name.replace('/', "%2F")
}

#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Written(Node),
    /// Suppressed by an id conflict.
    Skipped(Node),
}

impl WriteOutcome {
    /// The snapshot children are attached to.
    pub fn into_node(self) -> Node {
        match self {
            WriteOutcome::Written(node) | WriteOutcome::Skipped(node) => node,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub nodes: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct WriterState {
    rename: RenameFile,
    /// Lowercased target path to the id written there.
    paths: HashMap<String, String>,
    /// Lowercased ids that lost a conflict.
    conflicting: HashSet<String>,
    /// Server ids whose definition file was written.
    written: HashSet<String>,
    stats: WriteStats,
}

pub struct NodeWriter {
    fs: Arc<dyn FileSystem>,
    base: PathBuf,
    checksums: bool,
    state: Mutex<WriterState>,
}

impl NodeWriter {
    pub fn new(fs: Arc<dyn FileSystem>, base: impl Into<PathBuf>, rename: RenameFile) -> Self {
        Self {
            fs,
            base: base.into(),
            checksums: false,
            state: Mutex::new(WriterState {
                rename,
                ..WriterState::default()
            }),
        }
    }

    /// Skip rewriting files whose contents did not change.
    pub fn with_checksums(mut self, checksums: bool) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn stats(&self) -> WriteStats {
        self.state.lock().stats
    }

    pub fn conflicts(&self) -> usize {
        self.state.lock().rename.conflicts()
    }

    /// The id the node would be read back as, given the files written so far.
    fn recovered_id(state: &WriterState, node: &Node) -> String {
        let parent = node
            .parent
            .as_ref()
            .filter(|p| state.written.contains(&p.key()))
            .map(|p| {
                let mut parent = p.with_parent(None);
                parent.special_id = Some(p.key());
                Arc::new(parent)
            });
        let mut probe = node.with_parent(parent);
        probe.special_id = None;
        probe.node_id()
    }

    fn parent_has_conflict(state: &WriterState, node: &Node) -> bool {
        let mut current = node.parent.as_ref();
        while let Some(parent) = current {
            if state.conflicting.contains(&parent.key().to_lowercase()) {
                return true;
            }
            current = parent.parent.as_ref();
        }
        false
    }

    /// Applies renames and claims the node's path. Returns `false` if the node must not be
    /// written.
    fn claim(&self, node: &mut Node, directory: &[String]) -> bool {
        let mut state = self.state.lock();
        let server_id = node.key();
        let mut renamed = false;

        if !node.parent_resolves_metadata {
            if let Some(name) = state.rename.lookup(&server_id) {
                debug!("'{}' was renamed to '{}'", server_id, name);
                node.rename_to(name);
                renamed = true;
            }
        }
        if node.name().contains(':') {
            let safe = node.name().replace(':', "_");
            debug!(
                "Resolved ID conflict: '{}' was renamed to safe name '{}'",
                node.name(),
                safe
            );
            node.rename_to(safe);
            renamed = true;
        }
        if !node.parent_resolves_metadata
            && (renamed || Self::recovered_id(&state, node) != server_id)
        {
            node.special_id = Some(server_id.clone());
        }

        if Self::parent_has_conflict(&state, node) {
            debug!("ID conflict: Skipping '{}'", server_id);
            state.stats.skipped += 1;
            return false;
        }

        let path_key = directory
            .iter()
            .cloned()
            .chain(std::iter::once(escape_path_component(&node.file_name)))
            .collect::<Vec<_>>()
            .join("/")
            .to_lowercase();
        if let Some(existing) = state.paths.get(&path_key).cloned() {
            error!("ID conflict: '{}' conflicts with '{}'", server_id, existing);
            let path = state.rename.path().display().to_string();
            match state.rename.record_conflict(&server_id) {
                ConflictRecord::Added => {
                    info!(" - '{}' was added to the rename file at '{}'", server_id, path);
                    info!("Edit its name and run 'atsync pull' again.");
                }
                ConflictRecord::Pending => {
                    error!(
                        " - '{}' is present inside the rename file at '{}', but no name has been inserted yet.",
                        server_id, path
                    );
                    info!(" - Edit the node's name and run 'atsync pull' again");
                }
                ConflictRecord::RenameNotUnique => {
                    error!(" - The name for '{}' inside '{}' is not unique.", server_id, path);
                    info!(" - Edit the node's name and run 'atsync pull' again");
                }
            }
            state.conflicting.insert(server_id.to_lowercase());
            state.stats.skipped += 1;
            return false;
        }
        state.paths.insert(path_key, server_id);
        true
    }

    /// Writes `contents` unless checksums are enabled and the file already holds them.
    async fn output(&self, path: &Path, contents: &[u8]) -> Result<(), SyncError> {
        if self.checksums {
            if let Ok(existing) = self.fs.read_file(path).await {
                if blake3::hash(&existing) == blake3::hash(contents) {
                    self.state.lock().stats.files_unchanged += 1;
                    return Ok(());
                }
            }
        }
        self.fs.write_file(path, contents).await?;
        self.state.lock().stats.files_written += 1;
        Ok(())
    }

    pub async fn write(&self, mut node: Node) -> Result<WriteOutcome, SyncError> {
        let directory: Vec<String> = node
            .file_path()
            .iter()
            .map(|s| escape_path_component(s))
            .collect();
        if !self.claim(&mut node, &directory) {
            return Ok(WriteOutcome::Skipped(node));
        }

        let target = join_segments(&self.base, &directory);
        let file_name = escape_path_component(&node.file_name);

        if node.has_unresolved_metadata() {
            let path = if node.is_variable() {
                target.join(format!(".{}.json", file_name))
            } else {
                target
                    .join(&file_name)
                    .join(format!(".{}.json", node.node_class.name()))
            };
            let metadata = node.metadata()?;
            let json = serde_json::to_string_pretty(&metadata).map_err(|source| SyncError::Json {
                path: path.clone(),
                source,
            })?;
            self.output(&path, json.as_bytes()).await?;
            self.state.lock().written.insert(node.key());
        }

        if node.is_variable() && !node.value.no_write {
            let variant = node.variant()?;
            let bytes = encode_variant(&node.node_id(), &variant)?;
            self.output(&target.join(&file_name), &bytes).await?;
            // Children go to `<name>.inner`.
            let inner = format!("{}.inner", node.name());
            node.rename_to(inner);
        }

        self.state.lock().stats.nodes += 1;
        Ok(WriteOutcome::Written(node))
    }

    /// Writes the rename file. Unused renames are dropped in clean mode.
    pub async fn save_rename_file(&self, clean: bool) -> Result<(), SyncError> {
        let rename = self.state.lock().rename.clone();
        rename.save(self.fs.as_ref(), clean).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::model::{NodeId, Variant};
    use crate::sync::rename::RENAME_PLACEHOLDER;
    use crate::types::{reference_type, NodeClass};
    use tempfile::TempDir;

    fn object(name: &str, id: &str, parent: Option<Arc<Node>>) -> Node {
        let mut node = Node::browsed(name, NodeId::string(id), NodeClass::Object, parent);
        node.references
            .add(reference_type::HAS_TYPE_DEFINITION, NodeId::Numeric(61));
        node
    }

    fn variable(name: &str, id: &str, parent: Option<Arc<Node>>) -> Node {
        let mut node = Node::browsed(name, NodeId::string(id), NodeClass::Variable, parent);
        node.value.set(Variant::string("text"));
        node
    }

    fn writer(temp: &TempDir) -> NodeWriter {
        NodeWriter::new(
            Arc::new(LocalFileSystem::new()),
            temp.path().join("src"),
            RenameFile::new(temp.path().join("atsync").join("rename.json")),
        )
    }

    #[tokio::test]
    async fn test_writes_definition_and_value_files() {
        let temp = TempDir::new().unwrap();
        let writer = writer(&temp);
        let agent = writer.write(object("AGENT", "AGENT", None)).await.unwrap().into_node();
        let value = writer
            .write(variable("Name", "AGENT.Name", Some(Arc::new(agent))))
            .await
            .unwrap()
            .into_node();

        let src = temp.path().join("src");
        assert!(src.join("AGENT/.Object.json").exists());
        assert_eq!(std::fs::read_to_string(src.join("AGENT/Name")).unwrap(), "text");
        assert!(src.join("AGENT/.Name.json").exists());
        assert_eq!(value.file_name, "Name.inner");
        assert_eq!(value.special_id, None);
    }

    #[tokio::test]
    async fn test_case_conflict_skips_second_node_and_records_it() {
        let temp = TempDir::new().unwrap();
        let writer = writer(&temp);
        let agent = Arc::new(writer.write(object("AGENT", "AGENT", None)).await.unwrap().into_node());

        let first = writer.write(variable("Foo", "AGENT.Foo", Some(agent.clone()))).await.unwrap();
        assert!(matches!(first, WriteOutcome::Written(_)));
        let second = writer.write(variable("foo", "AGENT.foo", Some(agent))).await.unwrap();
        assert!(matches!(second, WriteOutcome::Skipped(_)));

        let src = temp.path().join("src");
        assert_eq!(std::fs::read_dir(src.join("AGENT")).unwrap().count(), 3);

        writer.save_rename_file(false).await.unwrap();
        let rename = std::fs::read_to_string(temp.path().join("atsync/rename.json")).unwrap();
        assert_eq!(
            rename,
            format!("{{\n  \"AGENT.foo\": \"{}\"\n}}\n", RENAME_PLACEHOLDER)
        );
    }

    #[tokio::test]
    async fn test_children_of_conflicting_node_are_skipped() {
        let temp = TempDir::new().unwrap();
        let writer = writer(&temp);
        let agent = Arc::new(writer.write(object("AGENT", "AGENT", None)).await.unwrap().into_node());
        writer.write(object("Foo", "AGENT.Foo", Some(agent.clone()))).await.unwrap();
        let loser = writer
            .write(object("FOO", "AGENT.FOO", Some(agent)))
            .await
            .unwrap()
            .into_node();
        let child = writer
            .write(variable("x", "AGENT.FOO.x", Some(Arc::new(loser))))
            .await
            .unwrap();
        assert!(matches!(child, WriteOutcome::Skipped(_)));
        assert_eq!(writer.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_escaped_and_renamed_nodes_store_their_id() {
        let temp = TempDir::new().unwrap();
        let mut rename = RenameFile::new(temp.path().join("rename.json"));
        rename.record_conflict("AGENT.Old");
        let writer = NodeWriter::new(Arc::new(LocalFileSystem::new()), temp.path(), rename);
        let agent = Arc::new(writer.write(object("AGENT", "AGENT", None)).await.unwrap().into_node());

        let escaped = writer
            .write(object("a:b", "AGENT.a:b", Some(agent)))
            .await
            .unwrap()
            .into_node();
        assert_eq!(escaped.file_name, "a_b");
        assert_eq!(escaped.special_id.as_deref(), Some("AGENT.a:b"));
        let definition = std::fs::read_to_string(temp.path().join("AGENT/a_b/.Object.json")).unwrap();
        assert!(definition.contains("\"nodeId\": \"AGENT.a:b\""));
    }

    #[tokio::test]
    async fn test_roots_below_unwritten_ancestors_store_their_id() {
        let temp = TempDir::new().unwrap();
        let writer = writer(&temp);
        let types = Arc::new(object("ObjectTypes", "ObjectTypes", None));
        let project = writer
            .write(object("PROJECT", "ObjectTypes.PROJECT", Some(types)))
            .await
            .unwrap()
            .into_node();
        assert_eq!(project.special_id.as_deref(), Some("ObjectTypes.PROJECT"));

        let child = writer
            .write(object("Pump", "ObjectTypes.PROJECT.Pump", Some(Arc::new(project))))
            .await
            .unwrap()
            .into_node();
        assert_eq!(child.special_id, None);
    }

    #[tokio::test]
    async fn test_checksums_skip_unchanged_files() {
        let temp = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let first = NodeWriter::new(fs.clone(), temp.path(), RenameFile::new("unused.json"))
            .with_checksums(true);
        first.write(variable("Name", "Name", None)).await.unwrap();
        assert_eq!(first.stats().files_written, 2);

        let second = NodeWriter::new(fs, temp.path(), RenameFile::new("unused.json"))
            .with_checksums(true);
        second.write(variable("Name", "Name", None)).await.unwrap();
        assert_eq!(second.stats().files_written, 0);
        assert_eq!(second.stats().files_unchanged, 2);
    }
}
