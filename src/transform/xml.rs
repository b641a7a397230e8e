//! Minimal XML document model
//!
//! Documents are parsed with `quick-xml` into an owned tree that keeps every text node, so a
//! document that is only moved around renders back with its original whitespace. Declarations,
//! comments, processing instructions and doctypes are kept verbatim.

use crate::error::{Location, SyncError};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Builder attributes storing the element position inside atvise builder.
pub const BUILDER_REF_ATTRIBUTES: [&str; 2] = ["atv:refpx", "atv:refpy"];

/// Elements moved to the top of the root element, in their final order.
const TOP_ELEMENTS: [&str; 4] = ["title", "desc", "defs", "metadata"];

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    /// Declarations, comments, processing instructions and doctypes.
    Raw(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub children: Vec<XmlNode>,
}

/// Output options for rendered documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XmlOptions {
    pub sort_attributes: bool,
    pub remove_builder_refs: bool,
}

fn location(input: &str, position: usize) -> Location {
    let consumed = &input.as_bytes()[..position.min(input.len())];
    let line = consumed.iter().filter(|b| **b == b'\n').count() + 1;
    let column = consumed.iter().rev().take_while(|b| **b != b'\n').count() + 1;
    Location { line, column }
}

fn parse_error(node_id: &str, input: &str, position: usize, message: impl Into<String>) -> SyncError {
    SyncError::Parse {
        node_id: node_id.to_string(),
        message: message.into(),
        location: Some(location(input, position)),
    }
}

fn element_from(node_id: &str, input: &str, position: usize, start: &BytesStart) -> Result<Element, SyncError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| parse_error(node_id, input, position, e.to_string()))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| parse_error(node_id, input, position, e.to_string()))?;
        element.attributes.push((
            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(element)
}

impl Document {
    /// Parses `input`. Errors are tagged with `node_id` and the position they occurred at.
    pub fn parse(node_id: &str, input: &str) -> Result<Self, SyncError> {
        let mut reader = Reader::from_str(input);
        let mut open: Vec<Element> = Vec::new();
        let mut document = Document::default();

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader
                .read_event()
                .map_err(|e| parse_error(node_id, input, reader.buffer_position() as usize, e.to_string()))?;
            let end = reader.buffer_position() as usize;

            let node = match event {
                Event::Eof => break,
                Event::Start(tag) => {
                    open.push(element_from(node_id, input, start, &tag)?);
                    continue;
                }
                Event::End(_) => match open.pop() {
                    Some(element) => XmlNode::Element(element),
                    None => return Err(parse_error(node_id, input, start, "Unexpected closing tag")),
                },
                Event::Empty(tag) => XmlNode::Element(element_from(node_id, input, start, &tag)?),
                Event::Text(text) => XmlNode::Text(
                    text.unescape()
                        .map_err(|e| parse_error(node_id, input, start, e.to_string()))?
                        .into_owned(),
                ),
                Event::CData(data) => XmlNode::CData(String::from_utf8_lossy(&data).into_owned()),
                _ => XmlNode::Raw(input.get(start..end).unwrap_or_default().to_string()),
            };

            match open.last_mut() {
                Some(parent) => parent.children.push(node),
                None => document.children.push(node),
            }
        }

        if let Some(element) = open.last() {
            return Err(parse_error(
                node_id,
                input,
                input.len(),
                format!("Unclosed element <{}>", element.name),
            ));
        }
        Ok(document)
    }

    pub fn root(&self) -> Option<&Element> {
        self.children.iter().find_map(XmlNode::as_element)
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.children.iter_mut().find_map(XmlNode::as_element_mut)
    }

    /// The top-level element named `name`.
    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter_map(XmlNode::as_element_mut)
            .find(|e| e.name == name)
    }

    /// Renders the document, applying the output options to the root element first.
    pub fn render(&mut self, options: XmlOptions) -> String {
        if let Some(root) = self.root_mut() {
            for name in TOP_ELEMENTS.iter().rev() {
                root.move_to_top(name);
            }
            root.walk_mut(&mut |element| {
                if options.remove_builder_refs {
                    element
                        .attributes
                        .retain(|(key, _)| !BUILDER_REF_ATTRIBUTES.contains(&key.as_str()));
                }
                if options.sort_attributes {
                    element.attributes.sort_by(|a, b| a.0.cmp(&b.0));
                }
            });
        }
        let mut out = String::new();
        for child in &self.children {
            child.render_into(&mut out);
        }
        out
    }

    /// A canonical form for comparing documents: whitespace-only text dropped, character data
    /// merged into text and attributes sorted.
    pub fn normalized(&self) -> Document {
        Document {
            children: normalize_nodes(&self.children),
        }
    }
}

fn normalize_nodes(nodes: &[XmlNode]) -> Vec<XmlNode> {
    let mut result: Vec<XmlNode> = Vec::new();
    for node in nodes {
        match node {
            XmlNode::Text(text) | XmlNode::CData(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                if let Some(XmlNode::Text(previous)) = result.last_mut() {
                    previous.push_str(text);
                } else {
                    result.push(XmlNode::Text(text.clone()));
                }
            }
            XmlNode::Raw(raw) => result.push(XmlNode::Raw(raw.trim().to_string())),
            XmlNode::Element(element) => {
                let mut attributes = element.attributes.clone();
                attributes.sort();
                result.push(XmlNode::Element(Element {
                    name: element.name.clone(),
                    attributes,
                    children: normalize_nodes(&element.children),
                }));
            }
        }
    }
    for node in result.iter_mut() {
        if let XmlNode::Text(text) = node {
            *text = text.trim().to_string();
        }
    }
    result
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, XmlNode::Text(text) if text.trim().is_empty())
    }

    fn render_into(&self, out: &mut String) {
        match self {
            XmlNode::Element(element) => element.render_into(out),
            XmlNode::Text(text) => out.push_str(&partial_escape(text.as_str())),
            XmlNode::CData(data) => {
                out.push_str("<![CDATA[");
                out.push_str(data);
                out.push_str("]]>");
            }
            XmlNode::Raw(raw) => out.push_str(raw),
        }
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attributes<K, V>(mut self, attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter_map(XmlNode::as_element_mut)
            .find(|e| e.name == name)
    }

    /// Follows a path of element names.
    pub fn find_path(&self, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |current, name| current.find_child(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.name == name)
    }

    /// Removes and returns every direct child element named `name`, together with the
    /// indentation in front of it.
    pub fn remove_children(&mut self, name: &str) -> Vec<Element> {
        let mut removed = Vec::new();
        let mut kept: Vec<XmlNode> = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match child {
                XmlNode::Element(element) if element.name == name => {
                    if kept.last().map(XmlNode::is_blank_text).unwrap_or(false) {
                        kept.pop();
                    }
                    removed.push(element);
                }
                other => kept.push(other),
            }
        }
        self.children = kept;
        removed
    }

    /// Concatenated text and character data of the direct children. `None` without any.
    pub fn text_content(&self) -> Option<String> {
        let mut found = false;
        let mut text = String::new();
        for child in &self.children {
            if let XmlNode::Text(value) | XmlNode::CData(value) = child {
                found = true;
                text.push_str(value);
            }
        }
        found.then_some(text)
    }

    pub fn append_child(&mut self, child: Element) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn prepend_child(&mut self, child: Element) {
        self.children.insert(0, XmlNode::Element(child));
    }

    /// Moves the first child element named `name` in front of all other children.
    pub fn move_to_top(&mut self, name: &str) {
        let index = self
            .children
            .iter()
            .position(|c| matches!(c, XmlNode::Element(e) if e.name == name));
        if let Some(index) = index {
            let child = self.children.remove(index);
            self.children.insert(0, child);
        }
    }

    pub fn walk_mut(&mut self, action: &mut dyn FnMut(&mut Element)) {
        action(self);
        for child in self.children.iter_mut().filter_map(XmlNode::as_element_mut) {
            child.walk_mut(action);
        }
    }

    fn render_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.render_into(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}
