//! Display splitting
//!
//! A display is an SVG document with embedded scripts and parameters. It is pulled as
//! `<name>.svg`, `<name>.js` (the inline script) and `<name>.json` (title, description, script
//! references and parameters, only when any are set).

use super::split::{config_source, parse_config, Sources, SplittingTransformer};
use super::xml::{Document, Element, XmlNode};
use super::TransformContext;
use crate::error::SyncError;
use crate::model::Node;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_SCRIPT_TYPE: &str = "text/ecmascript";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Linked,
    Referenced,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptReference {
    #[serde(rename = "type")]
    pub kind: ScriptKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ScriptReference {
    fn from_element(kind: ScriptKind, element: &Element) -> Self {
        let src = element
            .attribute("atv:href")
            .or_else(|| element.attribute("xlink:href"))
            .or_else(|| element.attribute("src"));
        Self {
            kind,
            src: src.map(str::to_string),
            name: element.attribute("atv:name").map(str::to_string),
            mime_type: element
                .attribute("type")
                .filter(|t| *t != DEFAULT_SCRIPT_TYPE)
                .map(str::to_string),
        }
    }

    fn has_values(&self) -> bool {
        self.src.is_some() || self.name.is_some() || self.mime_type.is_some()
    }

    fn to_element(&self) -> Element {
        let mut element = Element::new("script").with_attributes([(
            "type",
            self.mime_type.as_deref().unwrap_or(DEFAULT_SCRIPT_TYPE),
        )]);
        if let Some(src) = &self.src {
            let key = match self.kind {
                ScriptKind::Referenced => "xlink:href",
                _ => "atv:href",
            };
            element.attributes.push((key.to_string(), src.clone()));
        }
        if let Some(name) = &self.name {
            element.attributes.push(("atv:name".to_string(), name.clone()));
        }
        element
    }
}

/// Contents of a display's `.json` part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Vec<ScriptReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<IndexMap<String, String>>>,
    /// Shorthand for referenced scripts, only read.
    #[serde(default, skip_serializing)]
    pub dependencies: Option<Vec<String>>,
}

fn attribute_values(element: &Element, sorted: bool) -> IndexMap<String, String> {
    let mut values: IndexMap<String, String> = element.attributes.iter().cloned().collect();
    if sorted {
        values.sort_keys();
    }
    values
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayTransformer;

impl SplittingTransformer for DisplayTransformer {
    fn name(&self) -> &'static str {
        "display"
    }

    fn extension(&self) -> &'static str {
        ".display"
    }

    fn source_extensions(&self) -> &'static [&'static str] {
        &[".json", ".svg", ".js"]
    }

    fn should_be_transformed(&self, node: &Node) -> bool {
        node.is_display()
    }

    fn split(&self, node: &Node, context: &TransformContext) -> Result<Option<Sources>, SyncError> {
        let id = node.node_id();
        let text = node.value.text(&id)?;
        let mut document = Document::parse(&id, &text)?;
        let svg = document
            .find_child_mut("svg")
            .ok_or_else(|| SyncError::transform(&id, "Error parsing display: No `svg` tag"))?;

        let mut config = DisplayConfig::default();
        let mut scripts = Vec::new();
        let mut inline: Option<Element> = None;

        for tag in svg.remove_children("script") {
            if tag.attribute("atv:href").is_some() {
                scripts.push(ScriptReference::from_element(ScriptKind::Linked, &tag));
            } else if tag.attribute("src").is_some() || tag.attribute("xlink:href").is_some() {
                scripts.push(ScriptReference::from_element(ScriptKind::Referenced, &tag));
            } else if inline.is_some() {
                if id.starts_with("SYSTEM.LIBRARY.ATVISE") {
                    debug!("'{}' contains multiple inline scripts.", id);
                } else {
                    warn!("'{}' contains multiple inline scripts.", id);
                }
                svg.append_child(tag);
            } else if tag.text_content().map(|t| !t.is_empty()).unwrap_or(false) {
                scripts.push(ScriptReference::from_element(ScriptKind::Inline, &tag));
                inline = Some(tag);
            }
        }

        for (tag, slot) in [("title", &mut config.title), ("desc", &mut config.description)] {
            let mut found = svg.remove_children(tag).into_iter();
            if let Some(element) = found.next() {
                *slot = element.text_content();
            }
            if found.next().is_some() {
                warn!("Removed additional <{} /> element inside {}", tag, id);
            }
        }

        if let Some(metadata) = svg.find_child_mut("metadata") {
            let parameters: Vec<_> = metadata
                .remove_children("atv:parameter")
                .iter()
                .map(|p| attribute_values(p, context.xml.sort_attributes))
                .collect();
            if !parameters.is_empty() {
                config.parameters = Some(parameters);
            }
        }

        // A lone inline script without attributes needs no config entry
        if scripts.len() == 1 && scripts[0].kind == ScriptKind::Inline && !scripts[0].has_values() {
            scripts.clear();
        }
        if !scripts.is_empty() {
            config.scripts = Some(scripts);
        }

        let mut sources = Sources::new();
        if let Some(script) = inline {
            sources.insert(".js".to_string(), script.text_content().unwrap_or_default());
        }
        if let Some(json) = config_source(&id, &config)? {
            sources.insert(".json".to_string(), json);
        }
        sources.insert(".svg".to_string(), document.render(context.xml));
        Ok(Some(sources))
    }

    fn combine(&self, node: &Node, sources: &Sources, context: &TransformContext) -> Result<String, SyncError> {
        let id = node.node_id();
        let config: DisplayConfig = parse_config(node, sources)?;
        let svg_source = sources
            .get(".svg")
            .ok_or_else(|| SyncError::transform(&id, format!("No display SVG for {}", id)))?;
        let mut document = Document::parse(&id, svg_source)?;
        let svg = document
            .find_child_mut("svg")
            .ok_or_else(|| SyncError::transform(&id, "Error parsing display SVG: No `svg` tag"))?;

        if config.dependencies.is_some() && config.scripts.is_some() {
            return Err(SyncError::transform(
                &id,
                "Cannot use both 'dependencies' and 'scripts'",
            ));
        }

        let linked_supported = context.server_at_least(3, 5, 0);
        let referenced: Vec<ScriptReference> = match &config.dependencies {
            Some(dependencies) => dependencies
                .iter()
                .map(|src| ScriptReference {
                    kind: ScriptKind::Referenced,
                    src: Some(src.clone()),
                    name: None,
                    mime_type: None,
                })
                .collect(),
            None => config
                .scripts
                .iter()
                .flatten()
                .filter(|s| s.kind == ScriptKind::Referenced)
                .cloned()
                .collect(),
        };

        for script in config.scripts.iter().flatten() {
            if script.kind == ScriptKind::Linked {
                if !linked_supported {
                    return Err(SyncError::transform(
                        &id,
                        "Linked scripts are only supported on atserver 3.5 and later",
                    ));
                }
                svg.append_child(script.to_element());
            }
        }

        // Older servers do not keep the import order, dependencies go first
        if !linked_supported {
            referenced.iter().for_each(|s| svg.append_child(s.to_element()));
        }
        if let Some(code) = sources.get(".js") {
            let mut script = Element::new("script").with_attributes([("type", DEFAULT_SCRIPT_TYPE)]);
            script.children.push(XmlNode::CData(code.clone()));
            svg.append_child(script);
        }
        if linked_supported {
            referenced.iter().for_each(|s| svg.append_child(s.to_element()));
        }

        if let Some(parameters) = config.parameters.as_ref().filter(|p| !p.is_empty()) {
            let mut metadata = svg
                .remove_children("metadata")
                .into_iter()
                .next()
                .unwrap_or_else(|| Element::new("metadata"));
            for parameter in parameters.iter().rev() {
                metadata.prepend_child(
                    Element::new("atv:parameter")
                        .with_attributes(parameter.iter().map(|(k, v)| (k.clone(), v.clone()))),
                );
            }
            svg.prepend_child(metadata);
        }

        if let Some(description) = &config.description {
            svg.prepend_child(Element::new("desc").with_text(description.clone()));
        }
        if let Some(title) = &config.title {
            svg.prepend_child(Element::new("title").with_text(title.clone()));
        }

        Ok(document.render(context.xml))
    }
}
