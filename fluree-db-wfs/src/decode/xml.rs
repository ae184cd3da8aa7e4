//! Minimal element tree for single-record fragments.
//!
//! Records are small and bounded, so each one is parsed into a tree once
//! it has been framed out of the stream. Names are local (prefix stripped).

use crate::error::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    /// Namespace prefix as written, if any
    pub prefix: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub(crate) fn from_start(e: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        let prefix = e
            .name()
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        Ok(Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            prefix,
            attributes,
            ..Default::default()
        })
    }

    /// Attribute by local name (`gml:id` is `id`).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First child element, for wrapper elements holding exactly one geometry.
    pub fn first_child(&self) -> Option<&XmlNode> {
        self.children.first()
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// Parse a well-formed fragment into its root element.
pub fn parse_fragment(xml: &[u8]) -> Result<XmlNode> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(XmlNode::from_start(e)?),
            Event::Empty(ref e) => {
                let node = XmlNode::from_start(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(ref e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(ref e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        if root.is_some() && stack.is_empty() {
            break;
        }
    }

    root.ok_or_else(|| crate::error::WfsError::xml("Record fragment has no element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment() {
        let node = parse_fragment(
            br#"<topp:roads gml:id="roads.1"><topp:name>A &amp; B</topp:name><topp:lanes xsi:nil="true"/></topp:roads>"#,
        )
        .unwrap();
        assert_eq!(node.name, "roads");
        assert_eq!(node.prefix.as_deref(), Some("topp"));
        assert_eq!(node.attr("id"), Some("roads.1"));
        assert_eq!(node.child("name").unwrap().trimmed_text(), "A & B");
        assert_eq!(node.child("lanes").unwrap().attr("nil"), Some("true"));
        assert!(node.child("width").is_none());
    }

    #[test]
    fn test_unbalanced_fragment_fails() {
        assert!(parse_fragment(b"<a><b></a>").is_err());
    }
}
