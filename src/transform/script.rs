//! Script splitting
//!
//! Server scripts (`.script`), quick dynamics (`.qd`) and display scripts (`.ds`) share one XML
//! layout: a `<script>` root with `<metadata>`, `<parameter>` elements and a `<code>` block. They
//! are pulled as `<name>.js` plus a `<name>.json` holding metadata and parameters.

use super::split::{config_source, parse_config, Sources, SplittingTransformer};
use super::xml::{Document, Element, XmlNode};
use super::TransformContext;
use crate::error::SyncError;
use crate::model::Node;
use crate::types::ArrayType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    ServerScript,
    QuickDynamic,
    DisplayScript,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Icon {
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Single(String),
    Multiple(Vec<String>),
}

impl MetadataValue {
    fn values(&self) -> Vec<&str> {
        match self {
            MetadataValue::Single(value) => vec![value.as_str()],
            MetadataValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            MetadataValue::Single(first) => {
                *self = MetadataValue::Multiple(vec![std::mem::take(first), value]);
            }
            MetadataValue::Multiple(values) => values.push(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeTarget {
    pub namespace_index: u16,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(flatten)]
    pub attributes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RelativeTarget>,
}

/// Contents of a script's `.json` part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMap<String, MetadataValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Parameter>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptTransformer {
    flavor: ScriptFlavor,
}

impl ScriptTransformer {
    pub fn server_script() -> Self {
        Self {
            flavor: ScriptFlavor::ServerScript,
        }
    }

    pub fn quick_dynamic() -> Self {
        Self {
            flavor: ScriptFlavor::QuickDynamic,
        }
    }

    pub fn display_script() -> Self {
        Self {
            flavor: ScriptFlavor::DisplayScript,
        }
    }

    fn process_metadata(&self, node_id: &str, document: &Element, config: &mut ScriptConfig) {
        let Some(meta) = document.find_child("metadata") else {
            return;
        };
        for child in meta.elements() {
            let text = child.text_content();
            match child.name.as_str() {
                "icon" => {
                    config.icon = Some(Icon {
                        content: text.unwrap_or_default(),
                        attributes: child.attributes.iter().cloned().collect(),
                    })
                }
                "visible" => {
                    let raw = text.filter(|t| !t.is_empty()).unwrap_or_else(|| "1".to_string());
                    config.visible = Some(raw.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false));
                }
                "title" => config.title = text,
                "description" => config.description = text,
                name => {
                    let value = text.unwrap_or_default();
                    // Added to every display script by atserver 3.5
                    if name == "priority" && value.trim() == "0" {
                        continue;
                    }
                    if !["longrunning", "priority"].contains(&name) {
                        debug!(node_id, "Generic metadata element '{}'", name);
                    }
                    let metadata = config.metadata.get_or_insert_with(IndexMap::new);
                    match metadata.get_mut(name) {
                        Some(existing) => existing.push(value),
                        None => {
                            metadata.insert(name.to_string(), MetadataValue::Single(value));
                        }
                    }
                }
            }
        }
    }

    fn process_parameters(document: &Element, sorted: bool) -> Option<Vec<Parameter>> {
        let parameters: Vec<Parameter> = document
            .children_named("parameter")
            .map(|element| {
                let mut attributes: IndexMap<String, String> =
                    element.attributes.iter().cloned().collect();
                if sorted {
                    attributes.sort_keys();
                }
                let target = if element.attribute("relative") == Some("true") {
                    element
                        .elements()
                        .next()
                        .and_then(|path| path.find_path(&["Elements", "RelativePathElement", "TargetName"]))
                        .map(|target| {
                            let text = |name: &str| target.find_child(name).and_then(Element::text_content);
                            RelativeTarget {
                                namespace_index: text("NamespaceIndex")
                                    .and_then(|i| i.trim().parse().ok())
                                    .unwrap_or(1),
                                name: text("Name").unwrap_or_default(),
                            }
                        })
                } else {
                    None
                };
                Parameter { attributes, target }
            })
            .collect();
        (!parameters.is_empty()).then_some(parameters)
    }

    fn parameter_element(parameter: &Parameter) -> Element {
        let mut element = Element::new("parameter").with_attributes(
            parameter
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if parameter.attributes.get("relative").map(String::as_str) == Some("true") {
            let mut elements = Element::new("Elements");
            if let Some(target) = &parameter.target {
                elements.append_child(
                    Element::new("RelativePathElement").with_child(
                        Element::new("TargetName")
                            .with_child(
                                Element::new("NamespaceIndex")
                                    .with_text(target.namespace_index.to_string()),
                            )
                            .with_child(Element::new("Name").with_text(target.name.clone())),
                    ),
                );
            }
            element.append_child(Element::new("RelativePath").with_child(elements));
        }
        element
    }
}

impl SplittingTransformer for ScriptTransformer {
    fn name(&self) -> &'static str {
        match self.flavor {
            ScriptFlavor::ServerScript => "server script",
            ScriptFlavor::QuickDynamic => "quick dynamic",
            ScriptFlavor::DisplayScript => "display script",
        }
    }

    fn extension(&self) -> &'static str {
        match self.flavor {
            ScriptFlavor::ServerScript => ".script",
            ScriptFlavor::QuickDynamic => ".qd",
            ScriptFlavor::DisplayScript => ".ds",
        }
    }

    fn source_extensions(&self) -> &'static [&'static str] {
        &[".json", ".js"]
    }

    fn should_be_transformed(&self, node: &Node) -> bool {
        node.is_variable()
            && match self.flavor {
                ScriptFlavor::ServerScript => node.is_script(),
                ScriptFlavor::QuickDynamic => node.is_quick_dynamic(),
                ScriptFlavor::DisplayScript => node.is_display_script(),
            }
    }

    fn split(&self, node: &Node, context: &TransformContext) -> Result<Option<Sources>, SyncError> {
        let id = node.node_id();
        if node.value.array_type.unwrap_or(ArrayType::Scalar) != ArrayType::Scalar {
            return Err(SyncError::transform(&id, "Array of scripts not supported"));
        }

        let text = node.value.text(&id)?;
        if text.is_empty() {
            warn!("The script '{}' is empty, skipping...", id);
            return Ok(None);
        }

        let document = Document::parse(&id, &text)?;
        let script = document
            .root()
            .filter(|root| root.name == "script")
            .ok_or_else(|| SyncError::transform(&id, format!("Empty document at {}", id)))?;

        let mut config = ScriptConfig::default();
        self.process_metadata(&id, script, &mut config);
        config.parameters = Self::process_parameters(script, context.xml.sort_attributes);

        let mut sources = Sources::new();
        if let Some(json) = config_source(&id, &config)? {
            sources.insert(".json".to_string(), json);
        }
        let code = script
            .find_child("code")
            .and_then(Element::text_content)
            .unwrap_or_default();
        sources.insert(".js".to_string(), code);
        Ok(Some(sources))
    }

    fn combine(&self, node: &Node, sources: &Sources, context: &TransformContext) -> Result<String, SyncError> {
        let config: ScriptConfig = parse_config(node, sources)?;
        let code = sources.get(".js").cloned().unwrap_or_default();
        let mut script = Element::new("script");

        let mut meta: Vec<Element> = Vec::new();
        let has_priority = config
            .metadata
            .as_ref()
            .map(|m| m.contains_key("priority"))
            .unwrap_or(false);
        if self.flavor != ScriptFlavor::QuickDynamic && !has_priority {
            meta.push(Element::new("priority").with_text("0"));
        }
        if self.flavor == ScriptFlavor::QuickDynamic {
            if let Some(icon) = &config.icon {
                meta.push(
                    Element::new("icon")
                        .with_attributes(icon.attributes.iter().map(|(k, v)| (k.clone(), v.clone())))
                        .with_text(icon.content.clone()),
                );
            }
            if let Some(visible) = config.visible {
                meta.push(Element::new("visible").with_text(if visible { "1" } else { "0" }));
            }
            if let Some(title) = &config.title {
                meta.push(Element::new("title").with_text(title.clone()));
            }
            if let Some(description) = &config.description {
                meta.push(Element::new("description").with_text(description.clone()));
            }
        }
        for (name, value) in config.metadata.iter().flatten() {
            for v in value.values() {
                meta.push(Element::new(name.clone()).with_text(v));
            }
        }
        if self.flavor == ScriptFlavor::QuickDynamic || !meta.is_empty() {
            let mut metadata = Element::new("metadata");
            metadata.children = meta.into_iter().map(XmlNode::Element).collect();
            script.prepend_child(metadata);
        }

        for parameter in config.parameters.iter().flatten() {
            script.append_child(Self::parameter_element(parameter));
        }

        let mut code_element = Element::new("code");
        code_element.children.push(XmlNode::CData(code));
        script.append_child(code_element);

        let mut document = Document {
            children: vec![
                XmlNode::Raw(XML_DECLARATION.to_string()),
                XmlNode::Element(script),
            ],
        };
        Ok(document.render(context.xml))
    }
}
