//! XML document tree
//!
//! Node types produced by the tree builder, plus the inner-XML serializer
//! used when import parameters are spliced into referenced documents.

use crate::parse_util::ParseSourceSpan;
use std::collections::HashMap;
use std::fmt::Write;

/// A possibly-prefixed XML name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((prefix, local)) => QName {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            None => QName {
                prefix: None,
                local: raw.to_string(),
            },
        }
    }

    pub fn raw(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

/// Node type union
#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(Text),
    Comment(Comment),
}

/// Text node with entities already decoded.
#[derive(Debug, Clone)]
pub struct Text {
    pub value: String,
    pub span: ParseSourceSpan,
}

/// Comment node
#[derive(Debug, Clone)]
pub struct Comment {
    pub value: String,
    pub span: ParseSourceSpan,
}

/// Attribute with its raw (possibly prefixed) name.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// Element node. `namespace` is the resolved URI of the element's own name;
/// `namespaces` is the full in-scope prefix table (default prefix under "").
#[derive(Debug, Clone)]
pub struct Element {
    pub name: QName,
    pub namespace: Option<String>,
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
    pub namespaces: HashMap<String, String>,
    pub span: ParseSourceSpan,
}

impl Element {
    /// Value of the named (unprefixed) attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.prefix.is_none() && a.name.local == name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text content of direct child text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let Node::Text(t) = child {
                out.push_str(&t.value);
            }
        }
        out
    }

    /// Serialized markup of this element's children. Element markup is
    /// preserved so callers can splice fragments into other documents.
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            serialize_node(child, &mut out);
        }
        out
    }
}

fn serialize_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&escape_text(&t.value)),
        Node::Comment(c) => {
            let _ = write!(out, "<!--{}-->", c.value);
        }
        Node::Element(e) => {
            let _ = write!(out, "<{}", e.name.raw());
            for attr in &e.attrs {
                let _ = write!(out, " {}=\"{}\"", attr.name.raw(), escape_attr(&attr.value));
            }
            if e.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &e.children {
                    serialize_node(child, out);
                }
                let _ = write!(out, "</{}>", e.name.raw());
            }
        }
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
