//! XML tree builder
//!
//! Consumes the token stream and produces the document tree, resolving
//! `xmlns`/`xmlns:prefix` declarations as elements are opened.

use super::ast::{Attribute, Comment, Element, Node, QName, Text};
use super::lexer::{tokenize, Token, TokenKind};
use crate::parse_util::{ParseError, ParseSourceSpan};
use std::collections::HashMap;

/// Parse tree result
#[derive(Debug)]
pub struct ParseTreeResult {
    pub roots: Vec<Node>,
    pub errors: Vec<ParseError>,
}

/// Parse a source into a tree, collecting all errors.
pub fn parse(source: &str, url: &str) -> ParseTreeResult {
    let lexed = tokenize(source, url);
    let mut builder = TreeBuilder::new(lexed.tokens);
    builder.build();
    let mut errors = lexed.errors;
    errors.extend(builder.errors);
    ParseTreeResult {
        roots: builder.roots,
        errors,
    }
}

/// Parse a source expected to hold exactly one root element.
pub fn parse_document(source: &str, url: &str) -> Result<Element, ParseError> {
    let result = parse(source, url);
    if let Some(err) = result.errors.into_iter().next() {
        return Err(err);
    }
    let mut root_elements = result.roots.into_iter().filter_map(|n| match n {
        Node::Element(e) => Some(e),
        _ => None,
    });
    match (root_elements.next(), root_elements.next()) {
        (Some(root), None) => Ok(root),
        _ => Err(ParseError::new(
            empty_span(source, url),
            "expected exactly one root element",
        )),
    }
}

fn empty_span(source: &str, url: &str) -> ParseSourceSpan {
    use crate::parse_util::{ParseLocation, ParseSourceFile};
    let file = ParseSourceFile::new(source.to_string(), url.to_string());
    ParseSourceSpan::new(
        ParseLocation::new(file.clone(), 0, 0, 0),
        ParseLocation::new(file, 0, 0, 0),
    )
}

struct TreeBuilder {
    tokens: Vec<Token>,
    index: usize,
    stack: Vec<Element>,
    roots: Vec<Node>,
    errors: Vec<ParseError>,
}

impl TreeBuilder {
    fn new(tokens: Vec<Token>) -> Self {
        TreeBuilder {
            tokens,
            index: 0,
            stack: Vec::new(),
            roots: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.index.min(self.tokens.len() - 1)].kind
    }

    fn build(&mut self) {
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Prolog => {}
                TokenKind::Text(value) => {
                    self.append(Node::Text(Text {
                        value,
                        span: token.span,
                    }));
                }
                TokenKind::Cdata(value) => {
                    self.append(Node::Text(Text {
                        value,
                        span: token.span,
                    }));
                }
                TokenKind::Comment(value) => {
                    self.append(Node::Comment(Comment {
                        value,
                        span: token.span,
                    }));
                }
                TokenKind::TagOpenStart(name) => self.open_element(name, token.span),
                TokenKind::TagClose(name) => self.close_element(&name, token.span),
                other => {
                    self.errors
                        .push(ParseError::new(token.span, format!("unexpected {:?}", other)));
                }
            }
        }
        while let Some(unclosed) = self.stack.pop() {
            self.errors.push(ParseError::new(
                unclosed.span.clone(),
                format!("unclosed element '{}'", unclosed.name.raw()),
            ));
            self.append(Node::Element(unclosed));
        }
    }

    fn open_element(&mut self, raw_name: String, span: ParseSourceSpan) {
        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            match self.peek_kind().clone() {
                TokenKind::AttrName(name) => {
                    self.next();
                    let value = match self.peek_kind().clone() {
                        TokenKind::AttrValue(v) => {
                            self.next();
                            v
                        }
                        _ => String::new(),
                    };
                    attrs.push(Attribute {
                        name: QName::parse(&name),
                        value,
                    });
                }
                TokenKind::TagOpenEnd => {
                    self.next();
                    break;
                }
                TokenKind::TagSelfClose => {
                    self.next();
                    self_closing = true;
                    break;
                }
                _ => break,
            }
        }

        // In-scope prefix table: parent's table overlaid with declarations
        // on this element. The default namespace lives under "".
        let mut namespaces = self
            .stack
            .last()
            .map(|parent| parent.namespaces.clone())
            .unwrap_or_default();
        for attr in &attrs {
            match (&attr.name.prefix, attr.name.local.as_str()) {
                (None, "xmlns") => {
                    namespaces.insert(String::new(), attr.value.clone());
                }
                (Some(p), _) if p == "xmlns" => {
                    namespaces.insert(attr.name.local.clone(), attr.value.clone());
                }
                _ => {}
            }
        }

        let name = QName::parse(&raw_name);
        let namespace = resolve_namespace(&name, &namespaces);
        let element = Element {
            name,
            namespace,
            attrs,
            children: Vec::new(),
            namespaces,
            span,
        };
        if self_closing {
            self.append(Node::Element(element));
        } else {
            self.stack.push(element);
        }
    }

    fn close_element(&mut self, raw_name: &str, span: ParseSourceSpan) {
        match self.stack.pop() {
            Some(element) if element.name.raw() == raw_name => {
                self.append(Node::Element(element));
            }
            Some(element) => {
                self.errors.push(ParseError::new(
                    span,
                    format!(
                        "close tag '</{}>' does not match open element '{}'",
                        raw_name,
                        element.name.raw()
                    ),
                ));
                self.append(Node::Element(element));
            }
            None => {
                self.errors.push(ParseError::new(
                    span,
                    format!("close tag '</{}>' without open element", raw_name),
                ));
            }
        }
    }

    fn append(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }
}

fn resolve_namespace(name: &QName, namespaces: &HashMap<String, String>) -> Option<String> {
    match &name.prefix {
        Some(prefix) => namespaces.get(prefix).cloned(),
        None => namespaces.get("").cloned(),
    }
}
