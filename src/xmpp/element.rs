//! Minimal XML element tree for stanzas.
//!
//! Only what the gateway exchanges with the messaging server is supported:
//! default namespaces (`xmlns`), attributes, text and child elements.
//! Prefixed names are reduced to their local part.

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::GatewayError;

/// A single XML element with its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    ns: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: None,
            attrs: Vec::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    pub fn with_ns(name: impl Into<String>, ns: impl Into<String>) -> Self {
        let mut el = Self::new(name);
        el.ns = Some(ns.into());
        el
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter()
    }

    /// First child with the given local name and namespace.
    pub fn get_child(&self, name: &str, ns: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name == name && c.ns.as_deref() == Some(ns))
    }

    pub fn text_content(&self) -> &str {
        &self.text
    }

    pub fn is(&self, name: &str, ns: &str) -> bool {
        self.name == name && self.ns.as_deref() == Some(ns)
    }

    /// Parse a single element from `xml`. Content after the root closes is ignored.
    pub fn parse(xml: &str) -> Result<Element, GatewayError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let inherited = stack.last().and_then(|p| p.ns.clone());
                    stack.push(Self::from_start(&start, inherited)?);
                }
                Event::Empty(start) => {
                    let inherited = stack.last().and_then(|p| p.ns.clone());
                    let el = Self::from_start(&start, inherited)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => return Ok(el),
                    }
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| GatewayError::Protocol("unbalanced end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => return Ok(el),
                    }
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => {
                    return Err(GatewayError::Protocol("unexpected end of document".into()));
                }
                _ => {}
            }
        }
    }

    fn from_start(start: &BytesStart<'_>, inherited_ns: Option<String>) -> Result<Element, GatewayError> {
        let name = String::from_utf8_lossy(start.name().local_name().as_ref()).into_owned();
        let mut el = Element::new(name);
        el.ns = inherited_ns;

        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            if key == "xmlns" {
                el.ns = Some(value);
            } else if !key.starts_with("xmlns:") {
                el.attrs.push((key, value));
            }
        }
        Ok(el)
    }

    fn write_to(&self, f: &mut fmt::Formatter<'_>, parent_ns: Option<&str>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        if let Some(ns) = self.ns.as_deref() {
            if parent_ns != Some(ns) {
                write!(f, " xmlns=\"{}\"", escape(ns))?;
            }
        }
        for (key, value) in &self.attrs {
            write!(f, " {}=\"{}\"", key, escape(value.as_str()))?;
        }
        if self.children.is_empty() && self.text.is_empty() {
            return write!(f, "/>");
        }
        write!(f, ">{}", escape(self.text.as_str()))?;
        for child in &self.children {
            child.write_to(f, self.ns.as_deref())?;
        }
        write!(f, "</{}>", self.name)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, None)
    }
}
