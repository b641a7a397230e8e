//! Shared fixtures: an in-memory server and helpers for temporary projects.

use async_trait::async_trait;
use atsync::config::SyncConfig;
use atsync::fs::{FileSystem, LocalFileSystem};
use atsync::model::{NodeId, Value, Variant};
use atsync::server::{BrowseDirection, MethodResult, ReadResult, ReferenceDescription, Session};
use atsync::types::{reference_type, ArrayType, DataType, NodeClass, StatusCode};
use atsync::SyncError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const ROOT_FOLDER: u32 = 84;
const OBJECTS_FOLDER: u32 = 85;
const FOLDER_TYPE: u32 = 61;
const BASE_DATA_VARIABLE_TYPE: u32 = 63;

/// Order in which the server lists a node's references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingOrder {
    Insertion,
    Reversed,
    /// A permutation keyed by the seed.
    Shuffled(u64),
}

#[derive(Debug, Clone)]
struct StoredNode {
    id: NodeId,
    parent: NodeId,
    reference_type: i32,
    class: NodeClass,
    value: Option<Variant>,
    references: Vec<(i32, NodeId)>,
}

/// A server that keeps its address space in memory and records every write.
pub struct MemoryServer {
    nodes: Mutex<Vec<StoredNode>>,
    order: ListingOrder,
    not_writable: HashSet<String>,
    /// Ids written or created, in call order.
    log: Mutex<Vec<String>>,
    written: Mutex<BTreeMap<String, Variant>>,
    created: Mutex<Vec<serde_json::Value>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            order: ListingOrder::Insertion,
            not_writable: HashSet::new(),
            log: Mutex::new(Vec::new()),
            written: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_order(mut self, order: ListingOrder) -> Self {
        self.order = order;
        self
    }

    fn insert(self, id: &str, class: NodeClass, value: Option<Variant>) -> Self {
        let id = NodeId::string(id);
        let parent = id.parent().unwrap_or(NodeId::Numeric(OBJECTS_FOLDER));
        let reference_type = if parent == NodeId::Numeric(OBJECTS_FOLDER) {
            reference_type::ORGANIZES
        } else {
            reference_type::HAS_COMPONENT
        };
        let type_definition = if class == NodeClass::Variable {
            BASE_DATA_VARIABLE_TYPE
        } else {
            FOLDER_TYPE
        };
        self.nodes.lock().push(StoredNode {
            id,
            parent,
            reference_type,
            class,
            value,
            references: vec![(reference_type::HAS_TYPE_DEFINITION, NodeId::Numeric(type_definition))],
        });
        self
    }

    pub fn object(self, id: &str) -> Self {
        self.insert(id, NodeClass::Object, None)
    }

    pub fn variable(self, id: &str, value: Variant) -> Self {
        self.insert(id, NodeClass::Variable, Some(value))
    }

    pub fn string_variable(self, id: &str, value: &str) -> Self {
        self.variable(id, Variant::string(value))
    }

    pub fn int_variable(self, id: &str, value: i64) -> Self {
        self.variable(id, Variant::scalar(DataType::Int32, Value::Integer(value)))
    }

    pub fn object_type(self, id: &str) -> Self {
        self.insert(id, NodeClass::ObjectType, None)
    }

    /// Adds a non-hierarchical reference from `from` to `to`. A type definition replaces the
    /// default one.
    pub fn reference(self, from: &str, kind: i32, to: &str) -> Self {
        {
            let mut nodes = self.nodes.lock();
            if let Some(node) = nodes.iter_mut().find(|n| n.id.to_string() == from) {
                if kind == reference_type::HAS_TYPE_DEFINITION {
                    node.references.retain(|(k, _)| *k != kind);
                }
                node.references.push((kind, NodeId::parse(to)));
            }
        }
        self
    }

    pub fn not_writable(mut self, id: &str) -> Self {
        self.not_writable.insert(id.to_string());
        self
    }

    /// Changes the value of an existing variable.
    pub fn set_value(&self, id: &str, value: Variant) {
        if let Some(node) = self.nodes.lock().iter_mut().find(|n| n.id.to_string() == id) {
            node.value = Some(value);
        }
    }

    pub fn value(&self, id: &str) -> Option<Variant> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.id.to_string() == id)
            .and_then(|n| n.value.clone())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn written(&self) -> BTreeMap<String, Variant> {
        self.written.lock().clone()
    }

    pub fn created(&self) -> Vec<serde_json::Value> {
        self.created.lock().clone()
    }

    fn ordered<T>(&self, mut items: Vec<T>) -> Vec<T> {
        match self.order {
            ListingOrder::Insertion => items,
            ListingOrder::Reversed => {
                items.reverse();
                items
            }
            ListingOrder::Shuffled(seed) => {
                let mut keyed: Vec<([u8; 32], T)> = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let mut hasher = blake3::Hasher::new();
                        hasher.update(&seed.to_le_bytes());
                        hasher.update(&(index as u64).to_le_bytes());
                        (*hasher.finalize().as_bytes(), item)
                    })
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                keyed.into_iter().map(|(_, item)| item).collect()
            }
        }
    }

    fn class_of(&self, id: &NodeId) -> NodeClass {
        self.nodes
            .lock()
            .iter()
            .find(|n| &n.id == id)
            .map(|n| n.class)
            .unwrap_or(NodeClass::ObjectType)
    }

    fn describe(kind: i32, target: &NodeId, class: NodeClass) -> ReferenceDescription {
        ReferenceDescription {
            reference_type: kind,
            target: target.clone(),
            node_class: class,
            browse_name: target.browse_name().unwrap_or("Objects").to_string(),
        }
    }

    fn forward(&self, id: &NodeId) -> Vec<ReferenceDescription> {
        if id == &NodeId::Numeric(ROOT_FOLDER) {
            return vec![Self::describe(
                reference_type::ORGANIZES,
                &NodeId::Numeric(OBJECTS_FOLDER),
                NodeClass::Object,
            )];
        }
        let nodes = self.nodes.lock().clone();
        let children: Vec<ReferenceDescription> = nodes
            .iter()
            .filter(|n| &n.parent == id)
            .map(|n| Self::describe(n.reference_type, &n.id, n.class))
            .collect();
        let references: Vec<ReferenceDescription> = nodes
            .iter()
            .filter(|n| &n.id == id)
            .flat_map(|n| n.references.clone())
            .map(|(kind, target)| {
                let class = self.class_of(&target);
                Self::describe(kind, &target, class)
            })
            .collect();
        self.ordered(references.into_iter().chain(children).collect())
    }

    fn inverse(&self, id: &NodeId) -> Vec<ReferenceDescription> {
        if id == &NodeId::Numeric(OBJECTS_FOLDER) {
            return vec![Self::describe(
                reference_type::ORGANIZES,
                &NodeId::Numeric(ROOT_FOLDER),
                NodeClass::Object,
            )];
        }
        self.nodes
            .lock()
            .iter()
            .filter(|n| &n.id == id)
            .map(|n| Self::describe(n.reference_type, &n.parent, NodeClass::Object))
            .collect()
    }

    fn script_result(results: Vec<Value>) -> MethodResult {
        MethodResult {
            status: StatusCode::Good,
            outputs: vec![
                Variant::scalar(DataType::StatusCode, Value::Unsigned(0)),
                Variant::string(""),
                Variant::string(""),
                Variant {
                    data_type: DataType::Variant,
                    array_type: ArrayType::Array,
                    value: Value::Array(results),
                },
            ],
        }
    }

    fn create(&self, parameters: serde_json::Value) -> Vec<Value> {
        let id = parameters["nodeId"]
            .as_str()
            .unwrap_or_default()
            .trim_start_matches("ns=1;s=")
            .to_string();
        self.created.lock().push(parameters.clone());
        self.log.lock().push(id.clone());

        let exists = self.nodes.lock().iter().any(|n| n.id.to_string() == id);
        if exists {
            return vec![Value::Boolean(false), Value::Boolean(false)];
        }
        let class = parameters["nodeClass"]
            .as_u64()
            .and_then(|value| NodeClass::ALL.iter().copied().find(|c| u64::from(c.value()) == value))
            .unwrap_or(NodeClass::Object);
        let node_id = NodeId::string(id.as_str());
        self.nodes.lock().push(StoredNode {
            parent: node_id.parent().unwrap_or(NodeId::Numeric(OBJECTS_FOLDER)),
            id: node_id,
            reference_type: reference_type::HAS_COMPONENT,
            class,
            value: None,
            references: Vec::new(),
        });
        vec![Value::Boolean(true), Value::Boolean(false)]
    }
}

#[async_trait]
impl Session for MemoryServer {
    async fn browse(
        &self,
        id: &NodeId,
        direction: BrowseDirection,
    ) -> Result<Vec<ReferenceDescription>, SyncError> {
        Ok(match direction {
            BrowseDirection::Forward => self.forward(id),
            BrowseDirection::Inverse => self.inverse(id),
        })
    }

    async fn read_value(&self, id: &NodeId) -> Result<ReadResult, SyncError> {
        let nodes = self.nodes.lock();
        Ok(match nodes.iter().find(|n| &n.id == id) {
            Some(node) => ReadResult {
                value: node.value.clone(),
                status: StatusCode::Good,
            },
            None => ReadResult {
                value: None,
                status: StatusCode::BadNodeIdUnknown,
            },
        })
    }

    async fn read_type_info(&self, _id: &NodeId) -> Result<(DataType, i32), SyncError> {
        Ok((DataType::String, -1))
    }

    async fn write_value(&self, id: &NodeId, value: &Variant) -> Result<StatusCode, SyncError> {
        let key = id.to_string();
        if self.not_writable.contains(&key) {
            return Ok(StatusCode::BadNotWritable);
        }
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.iter_mut().find(|n| &n.id == id) else {
            return Ok(StatusCode::BadNodeIdUnknown);
        };
        node.value = Some(value.clone());
        self.log.lock().push(key.clone());
        self.written.lock().insert(key, value.clone());
        Ok(StatusCode::Good)
    }

    async fn call_method(&self, _id: &NodeId, args: Vec<Variant>) -> Result<MethodResult, SyncError> {
        let script = args
            .first()
            .and_then(|a| a.value.as_text())
            .unwrap_or_default()
            .to_string();
        let parameters = match args.get(3).map(|a| &a.value) {
            Some(Value::Array(items)) => items
                .first()
                .and_then(Value::as_text)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        };

        if script.ends_with("CreateNode") {
            Ok(Self::script_result(self.create(parameters)))
        } else {
            Ok(Self::script_result(vec![Value::Array(Vec::new())]))
        }
    }

    async fn close(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

pub fn local_fs() -> Arc<dyn FileSystem> {
    Arc::new(LocalFileSystem::new())
}

/// A configuration synchronizing `AGENT` into `<temp>/src`.
pub fn project_config(temp: &TempDir) -> SyncConfig {
    SyncConfig {
        nodes: vec!["AGENT".to_string()],
        source_dir: temp.path().join("src"),
        rename_file: temp.path().join("atsync").join("rename.json"),
        ..SyncConfig::default()
    }
}

/// Writes `contents` to `root/relative`, creating directories on the way.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Every file below `root`, keyed by its relative path.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn collect(root: &Path, directory: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(directory).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                collect(root, &path, files);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                files.insert(relative, fs::read(&path).unwrap());
            }
        }
    }

    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}
