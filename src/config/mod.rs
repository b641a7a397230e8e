//! Project configuration
//!
//! `SyncConfig` is assembled by `ConfigLoader` from built-in defaults, an optional `atsync.toml`
//! and `ATSYNC_*` environment variables, then validated once before a run starts.

pub mod facade;
pub mod merge;
pub mod sources;

pub use facade::ConfigLoader;

use crate::browse::{BrowseOptions, HandleOptions, NodeFilter};
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::model::NodeId;
use crate::transform::XmlOptions;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = "atsync.toml";

/// XML output options for displays and scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlConfig {
    #[serde(default)]
    pub sort_attributes: bool,
    #[serde(default = "default_true")]
    pub remove_builder_refs: bool,
}

impl Default for XmlConfig {
    fn default() -> Self {
        Self {
            sort_attributes: false,
            remove_builder_refs: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root node ids to pull.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    /// Id patterns that are neither browsed nor waited upon.
    #[serde(default = "default_ignore_nodes")]
    pub ignore_nodes: Vec<String>,

    /// Id patterns that are never waited upon.
    #[serde(default = "default_external_nodes")]
    pub external_nodes: Vec<String>,

    #[serde(default)]
    pub preserve_sort_order_nodes: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Standard folders collapsed out of pulled paths.
    #[serde(default = "default_compact_mapping")]
    pub compact_mapping: Vec<u32>,

    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    #[serde(default = "default_rename_file")]
    pub rename_file: PathBuf,

    /// Skip rewriting unchanged files on pull.
    #[serde(default)]
    pub checksums: bool,

    #[serde(default)]
    pub continue_on_failure: bool,

    /// Server version, e.g. `3.4.2`. Unset means a current server.
    #[serde(default)]
    pub server_version: Option<String>,

    #[serde(default)]
    pub xml: XmlConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_nodes() -> Vec<String> {
    ["AGENT", "SYSTEM", "ObjectTypes.PROJECT", "VariableTypes.PROJECT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignore_nodes() -> Vec<String> {
    [
        r"AGENT\.HISTORY",
        r"AGENT\.OPCUA\.server_url",
        r"SYSTEM\.INFORMATION\.LOGS",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_external_nodes() -> Vec<String> {
    [
        r"SYSTEM\.LIBRARY\.ATVISE",
        r"ObjectTypes\.ATVISE",
        r"VariableTypes\.ATVISE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_concurrency() -> usize {
    crate::concurrency::DEFAULT_WIDTH
}

fn default_compact_mapping() -> Vec<u32> {
    crate::transform::mapping::DEFAULT_COMPACT_MAPPING.to_vec()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("./src")
}

fn default_rename_file() -> PathBuf {
    PathBuf::from("./atsync/rename.json")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            ignore_nodes: default_ignore_nodes(),
            external_nodes: default_external_nodes(),
            preserve_sort_order_nodes: false,
            concurrency: default_concurrency(),
            compact_mapping: default_compact_mapping(),
            source_dir: default_source_dir(),
            rename_file: default_rename_file(),
            checksums: false,
            continue_on_failure: false,
            server_version: None,
            xml: XmlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Rejects values no run can work with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(SyncError::Config("No nodes to synchronize".to_string()));
        }
        self.server_version()?;
        self.node_filter()?;
        Ok(())
    }

    pub fn server_version(&self) -> Result<Option<Version>, SyncError> {
        self.server_version
            .as_deref()
            .map(|raw| {
                Version::parse(raw.trim()).map_err(|e| {
                    SyncError::Config(format!("Invalid server version '{}': {}", raw, e))
                })
            })
            .transpose()
    }

    pub fn root_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| NodeId::parse(n)).collect()
    }

    pub fn node_filter(&self) -> Result<NodeFilter, SyncError> {
        NodeFilter::new(self.nodes.clone())
            .with_ignored(&self.ignore_nodes)?
            .with_external(&self.external_nodes)
    }

    pub fn browse_options(&self) -> BrowseOptions {
        BrowseOptions {
            concurrency: self.concurrency,
            continue_on_failure: self.continue_on_failure,
            handle: HandleOptions::default(),
        }
    }

    pub fn xml_options(&self) -> XmlOptions {
        XmlOptions {
            sort_attributes: self.xml.sort_attributes,
            remove_builder_refs: self.xml.remove_builder_refs,
        }
    }
}
