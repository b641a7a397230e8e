//! Splitting and combining
//!
//! Pulling a container node produces `<name><container extension>` plus part files named
//! `<name><part extension>` inside the container's directory. Pushing reads the parts back from
//! that directory and combines them into the container's value.

use super::{TransformContext, Transformed, Transformer};
use crate::error::SyncError;
use crate::model::{Node, Value, Variant};
use crate::types::{ArrayType, DataType};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A part file produced by splitting a container.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPart {
    pub file_name: String,
    pub value: Variant,
}

/// Part contents keyed by extension, e.g. `.js`.
pub type Sources = BTreeMap<String, String>;

pub trait SplittingTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extension appended to pulled container names.
    fn extension(&self) -> &'static str;

    /// Part file extensions read back when combining.
    fn source_extensions(&self) -> &'static [&'static str];

    fn should_be_transformed(&self, node: &Node) -> bool;

    /// Splits the container's value into parts keyed by extension. `None` suppresses the node.
    fn split(&self, node: &Node, context: &TransformContext) -> Result<Option<Sources>, SyncError>;

    /// Builds the container value from its parts.
    fn combine(&self, node: &Node, sources: &Sources, context: &TransformContext) -> Result<String, SyncError>;
}

/// Adapts a `SplittingTransformer` to a pipeline stage.
pub struct Splitting<T>(pub T);

#[async_trait]
impl<T: SplittingTransformer> Transformer for Splitting<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn transform_from_db(
        &self,
        mut node: Node,
        context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        if !self.0.should_be_transformed(&node) {
            return Ok(Transformed::Pass(node));
        }
        let sources = match self.0.split(&node, context)? {
            Some(sources) => sources,
            None => return Ok(Transformed::Suppressed),
        };

        let base = node.name().to_string();
        let parts = sources
            .into_iter()
            .map(|(extension, text)| super::text_part(format!("{}{}", base, extension), text))
            .collect();

        node.rename_to(format!("{}{}", base, self.0.extension()));
        node.value.no_write = true;
        node.fully_mapped = true;
        Ok(Transformed::Split {
            container: node,
            parts,
        })
    }

    async fn transform_from_filesystem(
        &self,
        mut node: Node,
        context: &TransformContext,
    ) -> Result<Transformed, SyncError> {
        if !self.0.should_be_transformed(&node) {
            return Ok(Transformed::Pass(node));
        }
        let directory = match node.file_info() {
            Some(info) => info.value_path.clone(),
            None => return Ok(Transformed::Pass(node)),
        };
        let base = node
            .name()
            .strip_suffix(self.0.extension())
            .unwrap_or(node.name())
            .to_string();

        let mut sources = Sources::new();
        let entries = if context.fs.exists(&directory).await {
            context.fs.list_dir(&directory).await?
        } else {
            Vec::new()
        };
        for entry in entries {
            let Some(extension) = entry.strip_prefix(base.as_str()) else {
                continue;
            };
            if !self.0.source_extensions().contains(&extension) {
                debug!(file = %entry, container = %base, "Ignoring unknown part file");
                continue;
            }
            let text = context.fs.read_text(&directory.join(&entry)).await?;
            sources.insert(extension.to_string(), text);
        }

        let combined = self.0.combine(&node, &sources, context)?;
        node.value.data_type = node.value.data_type.or(Some(DataType::XmlElement));
        node.value.array_type = node.value.array_type.or(Some(ArrayType::Scalar));
        node.value.value = Some(Value::Text(combined));
        node.value.raw = None;
        node.rename_to(base);
        node.fully_mapped = true;
        Ok(Transformed::Pass(node))
    }

    /// Containers have no value file of their own.
    fn read_node_file(&self, node: &Node) -> Option<bool> {
        self.0.should_be_transformed(node).then_some(false)
    }
}

/// Serializes `config` unless every field was skipped as empty.
pub fn config_source<C: Serialize>(node_id: &str, config: &C) -> Result<Option<String>, SyncError> {
    let value = serde_json::to_value(config).map_err(|e| SyncError::transform(node_id, e.to_string()))?;
    let is_empty = match &value {
        serde_json::Value::Object(fields) => fields.is_empty(),
        serde_json::Value::Null => true,
        _ => false,
    };
    if is_empty {
        return Ok(None);
    }
    serde_json::to_string_pretty(&value)
        .map(Some)
        .map_err(|e| SyncError::transform(node_id, e.to_string()))
}

/// Parses an optional `.json` part.
pub fn parse_config<C: serde::de::DeserializeOwned + Default>(
    node: &Node,
    sources: &Sources,
) -> Result<C, SyncError> {
    match sources.get(".json") {
        Some(text) => serde_json::from_str(text).map_err(|e| {
            SyncError::transform(
                node.node_id(),
                format!("Error parsing JSON in {}.json: {}", node.name(), e),
            )
        }),
        None => Ok(C::default()),
    }
}
