//! Minimal namespace-aware XML element tree
//!
//! Replies and envelopes are small, so the whole document is read into an
//! [`Element`] tree. Element and attribute names are kept as local names;
//! each element records the namespace its name resolves to, whether it is
//! bound through a default `xmlns` or a prefix.

use std::borrow::Cow;

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),

    #[error("invalid attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("undeclared namespace prefix '{0}'")]
    UnknownPrefix(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("unexpected content after the root element")]
    TrailingContent,

    #[error("unclosed element <{0}>")]
    Unclosed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Local name
    pub name: String,
    /// Resolved namespace of the element name
    pub namespace: Option<String>,
    /// Attributes by local name, excluding namespace declarations
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated text content, untrimmed
    pub text: String,
}

impl Element {
    /// Parse a document and return its root element
    pub fn parse(input: &str) -> Result<Element, XmlError> {
        let mut reader = NsReader::from_str(input);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            match event {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(XmlError::TrailingContent);
                    }
                    stack.push(open_element(&start, resolved_namespace(resolved)?)?);
                }
                Event::Empty(start) => {
                    if root.is_some() {
                        return Err(XmlError::TrailingContent);
                    }
                    let element = open_element(&start, resolved_namespace(resolved)?)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::End(_) => {
                    // quick-xml checks that end names match
                    let Some(mut element) = stack.pop() else {
                        return Err(XmlError::TrailingContent);
                    };
                    // indentation between child elements
                    if !element.children.is_empty() && element.text.trim().is_empty() {
                        element.text.clear();
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    match stack.last_mut() {
                        Some(element) => element.text.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => return Err(XmlError::TrailingContent),
                    }
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    if let Some(element) = stack.last_mut() {
                        element.text.push_str(&String::from_utf8_lossy(&bytes));
                    }
                }
                Event::Eof => break,
                // declarations, comments, processing instructions
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::Unclosed(open.name));
        }
        root.ok_or(XmlError::NoRoot)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn resolved_namespace(resolved: ResolveResult<'_>) -> Result<Option<String>, XmlError> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(String::from_utf8_lossy(ns).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(XmlError::UnknownPrefix(
            String::from_utf8_lossy(&prefix).into_owned(),
        )),
    }
}

fn open_element(start: &BytesStart<'_>, namespace: Option<String>) -> Result<Element, XmlError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let value = attr.unescape_value()?.into_owned();
        let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attributes.push((local, value));
    }

    Ok(Element {
        name,
        namespace,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Escape text or attribute content
pub fn escape(s: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inherits_namespace() {
        let doc = r#"<?xml version="1.0"?>
            <rpc-reply message-id="7" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
              <data>
                <interfaces xmlns="urn:example:interfaces">
                  <interface><name>eth0</name></interface>
                </interfaces>
              </data>
            </rpc-reply>"#;
        let root = Element::parse(doc).unwrap();

        assert_eq!(root.name, "rpc-reply");
        assert_eq!(root.attribute("message-id"), Some("7"));
        let data = root.child("data").unwrap();
        assert_eq!(
            data.namespace.as_deref(),
            Some("urn:ietf:params:xml:ns:netconf:base:1.0")
        );
        let interfaces = data.child("interfaces").unwrap();
        assert_eq!(interfaces.namespace.as_deref(), Some("urn:example:interfaces"));
        let name = interfaces.child("interface").unwrap().child("name").unwrap();
        assert_eq!(name.text, "eth0");
        assert_eq!(name.namespace.as_deref(), Some("urn:example:interfaces"));
    }

    #[test]
    fn test_prefixed_attribute_uses_local_name() {
        let doc = r#"<interfaces xmlns="urn:x" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:operation="replace"/>"#;
        let root = Element::parse(doc).unwrap();
        assert_eq!(root.attribute("operation"), Some("replace"));
        assert_eq!(root.attributes.len(), 1);
    }

    #[test]
    fn test_parse_resolves_prefixed_names() {
        let doc = r#"<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:message-id="3">
              <nc:data>
                <sys:system xmlns:sys="urn:example:system"><sys:hostname>r1</sys:hostname></sys:system>
              </nc:data>
            </nc:rpc-reply>"#;
        let root = Element::parse(doc).unwrap();

        assert_eq!(root.name, "rpc-reply");
        assert_eq!(
            root.namespace.as_deref(),
            Some("urn:ietf:params:xml:ns:netconf:base:1.0")
        );
        assert_eq!(root.attribute("message-id"), Some("3"));
        let system = root.child("data").unwrap().child("system").unwrap();
        assert_eq!(system.namespace.as_deref(), Some("urn:example:system"));
        assert_eq!(system.child("hostname").unwrap().text, "r1");
    }

    #[test]
    fn test_undeclared_prefix_is_rejected() {
        let err = Element::parse("<sys:system><sys:hostname/></sys:system>").unwrap_err();
        assert!(matches!(err, XmlError::UnknownPrefix(p) if p == "sys"));
    }

    #[test]
    fn test_leaf_text_is_not_trimmed() {
        let root = Element::parse("<motd>\n  <line>  padded  </line>\n</motd>").unwrap();
        assert_eq!(root.text, "");
        assert_eq!(root.child("line").unwrap().text, "  padded  ");
    }

    #[test]
    fn test_unescapes_text() {
        let root = Element::parse("<description>a &amp; b</description>").unwrap();
        assert_eq!(root.text, "a & b");
    }

    #[test]
    fn test_rejects_broken_documents() {
        assert!(Element::parse("").is_err());
        assert!(Element::parse("<a><b></a>").is_err());
        assert!(Element::parse("<a>").is_err());
        assert!(Element::parse("not xml at all").is_err());
    }
}
