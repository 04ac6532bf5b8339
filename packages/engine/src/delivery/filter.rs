//! Streaming execution dispatch
//!
//! Drives a SAX-style event stream through the planned dispatch indices.
//! Matching is evaluated against the running element path; position counters
//! fire before user visitors; After visitors re-evaluate their selector at
//! element end and do not require Before to have fired.

use super::{ContentDeliveryConfig, DispatchEntry};
use crate::error::{FilterError, VisitError};
use crate::expression::EvalContext;
use crate::selector::{MatchContext, PathFrame, WILDCARD_KEY};
use crate::xml::lexer::{tokenize, Token, TokenKind};
use crate::xml::{Element, Node};
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a visitor sees of an open element.
pub type ElementView = PathFrame;

/// Events produced by the pull reader.
#[derive(Debug, Clone, PartialEq)]
pub enum SaxEvent {
    StartDocument,
    StartElement(ElementView),
    Characters(String),
    EndElement,
    EndDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Fresh,
    Started,
    Done,
}

/// Pull source of [`SaxEvent`]s over a character-decoded document. Readers
/// are reusable: `reset` returns one to its initial state for pooling.
#[derive(Debug)]
pub struct XmlReader {
    tokens: Vec<Token>,
    index: usize,
    pending: VecDeque<SaxEvent>,
    ns_stack: Vec<HashMap<String, String>>,
    open: Vec<String>,
    state: ReaderState,
}

impl XmlReader {
    pub fn new() -> Self {
        XmlReader {
            tokens: Vec::new(),
            index: 0,
            pending: VecDeque::new(),
            ns_stack: Vec::new(),
            open: Vec::new(),
            state: ReaderState::Fresh,
        }
    }

    /// Load a document. Lexical errors fail here, before any event is
    /// delivered.
    pub fn set_source(&mut self, source: &str, url: &str) -> Result<(), FilterError> {
        self.reset();
        let lexed = tokenize(source, url);
        if let Some(err) = lexed.errors.first() {
            return Err(FilterError::MalformedDocument {
                message: err.to_string(),
            });
        }
        self.tokens = lexed.tokens;
        Ok(())
    }

    /// Return the reader to its initial state.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.index = 0;
        self.pending.clear();
        self.ns_stack.clear();
        self.open.clear();
        self.state = ReaderState::Fresh;
    }

    /// Whether the reader sits at a consistent document boundary (it has not
    /// started a document, or it finished one).
    pub fn at_document_boundary(&self) -> bool {
        self.state != ReaderState::Started
    }

    /// Next event, or `None` after `EndDocument`.
    pub fn next_event(&mut self) -> Result<Option<SaxEvent>, FilterError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.state == ReaderState::Done {
            return Ok(None);
        }
        if self.state == ReaderState::Fresh {
            self.state = ReaderState::Started;
            return Ok(Some(SaxEvent::StartDocument));
        }
        loop {
            let token = match self.tokens.get(self.index) {
                Some(t) => t.clone(),
                None => return self.finish(),
            };
            self.index += 1;
            match token.kind {
                TokenKind::Eof => return self.finish(),
                TokenKind::Prolog | TokenKind::Comment(_) => continue,
                TokenKind::Text(value) | TokenKind::Cdata(value) => {
                    if self.open.is_empty() {
                        // Inter-element whitespace outside the root.
                        continue;
                    }
                    return Ok(Some(SaxEvent::Characters(value)));
                }
                TokenKind::TagOpenStart(raw_name) => {
                    return Ok(Some(self.start_element(raw_name)));
                }
                TokenKind::TagClose(raw_name) => {
                    let expected = self.open.pop();
                    self.ns_stack.pop();
                    if expected.as_deref() != Some(raw_name.as_str()) {
                        return Err(FilterError::MalformedDocument {
                            message: format!("unexpected close tag '</{}>'", raw_name),
                        });
                    }
                    return Ok(Some(SaxEvent::EndElement));
                }
                other => {
                    return Err(FilterError::MalformedDocument {
                        message: format!("unexpected token {:?}", other),
                    })
                }
            }
        }
    }

    fn start_element(&mut self, raw_name: String) -> SaxEvent {
        let mut attrs: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;
        while let Some(token) = self.tokens.get(self.index) {
            match &token.kind {
                TokenKind::AttrName(name) => {
                    let name = name.clone();
                    self.index += 1;
                    let value = match self.tokens.get(self.index).map(|t| &t.kind) {
                        Some(TokenKind::AttrValue(v)) => {
                            let v = v.clone();
                            self.index += 1;
                            v
                        }
                        _ => String::new(),
                    };
                    attrs.push((name, value));
                }
                TokenKind::TagOpenEnd => {
                    self.index += 1;
                    break;
                }
                TokenKind::TagSelfClose => {
                    self.index += 1;
                    self_closing = true;
                    break;
                }
                _ => break,
            }
        }

        let mut namespaces = self.ns_stack.last().cloned().unwrap_or_default();
        for (name, value) in &attrs {
            if name == "xmlns" {
                namespaces.insert(String::new(), value.clone());
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                namespaces.insert(prefix.to_string(), value.clone());
            }
        }
        let (prefix, local) = match raw_name.split_once(':') {
            Some((p, l)) => (Some(p.to_string()), l.to_string()),
            None => (None, raw_name.clone()),
        };
        let namespace = match &prefix {
            Some(p) => namespaces.get(p).cloned(),
            None => namespaces.get("").cloned(),
        };

        let view = ElementView {
            local,
            namespace,
            attrs,
        };
        if self_closing {
            self.pending.push_back(SaxEvent::EndElement);
        } else {
            self.open.push(raw_name);
            self.ns_stack.push(namespaces);
        }
        SaxEvent::StartElement(view)
    }

    fn finish(&mut self) -> Result<Option<SaxEvent>, FilterError> {
        if let Some(unclosed) = self.open.last() {
            return Err(FilterError::MalformedDocument {
                message: format!("unclosed element '{}'", unclosed),
            });
        }
        self.state = ReaderState::Done;
        Ok(Some(SaxEvent::EndDocument))
    }
}

impl Default for XmlReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared flag for aborting an execution from outside.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        TerminationFlag::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterState {
    count: usize,
    depth: usize,
}

/// Per-execution state: evaluation values for conditions and expression
/// predicates, position-counter values, and the termination flag.
#[derive(Debug)]
pub struct ExecutionContext {
    counters: Vec<CounterState>,
    eval: EvalContext,
    termination: TerminationFlag,
}

impl ExecutionContext {
    pub fn new(delivery: &ContentDeliveryConfig) -> Self {
        ExecutionContext {
            counters: vec![CounterState::default(); delivery.counter_count()],
            eval: EvalContext::new(),
            termination: TerminationFlag::new(),
        }
    }

    pub fn eval_context_mut(&mut self) -> &mut EvalContext {
        &mut self.eval
    }

    /// Handle callers can use to abort the execution from another thread.
    pub fn termination(&self) -> TerminationFlag {
        self.termination.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_terminated()
    }

    fn increment_counter(&mut self, id: usize, depth: usize) {
        if let Some(state) = self.counters.get_mut(id) {
            state.count += 1;
            state.depth = depth;
        }
    }

    /// Reset counters counting children of scopes that closed above `depth`.
    fn reset_counters_below(&mut self, depth: usize) {
        for state in &mut self.counters {
            if state.count > 0 && state.depth > depth + 1 {
                state.count = 0;
            }
        }
    }
}

impl MatchContext for ExecutionContext {
    fn counter_value(&self, counter: usize) -> usize {
        self.counters.get(counter).map(|s| s.count).unwrap_or(0)
    }

    fn eval_context(&self) -> &EvalContext {
        &self.eval
    }
}

/// Streaming filter: one planned delivery config driving one document.
pub struct Filter<'a> {
    delivery: &'a ContentDeliveryConfig,
}

impl<'a> Filter<'a> {
    pub fn new(delivery: &'a ContentDeliveryConfig) -> Self {
        Filter { delivery }
    }

    /// Filter a full document through the dispatch indices.
    pub fn filter(
        &self,
        reader: &mut XmlReader,
        source: &str,
        url: &str,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        reader.set_source(source, url)?;
        let mut path: SmallVec<[PathFrame; 8]> = SmallVec::new();
        while let Some(event) = reader.next_event()? {
            if context.is_terminated() {
                return Err(FilterError::Terminated);
            }
            self.dispatch(event, &mut path, context)?;
        }
        Ok(())
    }

    /// Filter a DOM subtree as if its events had been streamed. Used when a
    /// fragment of a larger document is piped through its own pipeline.
    pub fn filter_fragment(
        &self,
        element: &Element,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        let mut path: SmallVec<[PathFrame; 8]> = SmallVec::new();
        self.dispatch(SaxEvent::StartDocument, &mut path, context)?;
        self.fragment_events(element, &mut path, context)?;
        self.dispatch(SaxEvent::EndDocument, &mut path, context)
    }

    fn fragment_events(
        &self,
        element: &Element,
        path: &mut SmallVec<[PathFrame; 8]>,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        if context.is_terminated() {
            return Err(FilterError::Terminated);
        }
        let view = ElementView {
            local: element.name.local.clone(),
            namespace: element.namespace.clone(),
            attrs: element
                .attrs
                .iter()
                .map(|a| (a.name.raw(), a.value.clone()))
                .collect(),
        };
        self.dispatch(SaxEvent::StartElement(view), path, context)?;
        for child in &element.children {
            match child {
                Node::Element(e) => self.fragment_events(e, path, context)?,
                Node::Text(t) => {
                    self.dispatch(SaxEvent::Characters(t.value.clone()), path, context)?
                }
                Node::Comment(_) => {}
            }
        }
        self.dispatch(SaxEvent::EndElement, path, context)
    }

    fn dispatch(
        &self,
        event: SaxEvent,
        path: &mut SmallVec<[PathFrame; 8]>,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        match event {
            SaxEvent::StartDocument | SaxEvent::EndDocument => Ok(()),
            SaxEvent::StartElement(view) => self.start_element(view, path, context),
            SaxEvent::Characters(text) => self.characters(&text, path, context),
            SaxEvent::EndElement => self.end_element(path, context),
        }
    }

    fn start_element(
        &self,
        view: ElementView,
        path: &mut SmallVec<[PathFrame; 8]>,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        // Parent child-visitors see the new element before its own Before.
        if let Some(parent) = path.last() {
            let parent_local = parent.local.clone();
            for entry in self.matching(&self.delivery.child, &parent_local, path, context) {
                if let Some(children) = entry.handler.children.clone() {
                    self.fire(&entry, context, |ctx| children.visit_child_element(&view, ctx))?;
                }
            }
        }

        path.push(view);
        let local = path.last().map(|f| f.local.clone()).unwrap_or_default();

        // Position counters fire first.
        for key in [local.as_str(), WILDCARD_KEY] {
            for counter in self.delivery.counters(key) {
                if counter.prefix.matches(path, context) {
                    context.increment_counter(counter.id, path.len());
                }
            }
        }

        for entry in self.matching(&self.delivery.before, &local, path, context) {
            if let Some(before) = entry.handler.before.clone() {
                let view = path.last().cloned().unwrap_or_else(|| PathFrame::new(""));
                self.fire(&entry, context, |ctx| before.visit_before(&view, ctx))?;
            }
        }
        Ok(())
    }

    fn characters(
        &self,
        text: &str,
        path: &mut SmallVec<[PathFrame; 8]>,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        let Some(current) = path.last() else {
            return Ok(());
        };
        let local = current.local.clone();
        for entry in self.matching(&self.delivery.child, &local, path, context) {
            if let Some(children) = entry.handler.children.clone() {
                self.fire(&entry, context, |ctx| children.visit_child_text(text, ctx))?;
            }
        }
        Ok(())
    }

    fn end_element(
        &self,
        path: &mut SmallVec<[PathFrame; 8]>,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        let Some(current) = path.last() else {
            return Ok(());
        };
        let local = current.local.clone();
        // Selector match is re-evaluated here; After does not require Before
        // to have fired.
        for entry in self.matching(&self.delivery.after, &local, path, context) {
            if let Some(after) = entry.handler.after.clone() {
                let view = path.last().cloned().unwrap_or_else(|| PathFrame::new(""));
                self.fire(&entry, context, |ctx| after.visit_after(&view, ctx))?;
            }
        }
        path.pop();
        context.reset_counters_below(path.len());
        Ok(())
    }

    /// Entries under `key` then under `"*"`, filtered to those whose
    /// selector matches the current path and whose condition holds.
    fn matching(
        &self,
        index: &'a HashMap<String, Vec<DispatchEntry>>,
        key: &str,
        path: &[PathFrame],
        context: &ExecutionContext,
    ) -> Vec<DispatchEntry> {
        let mut matched = Vec::new();
        let buckets: [&[DispatchEntry]; 2] = [
            index.get(key).map(Vec::as_slice).unwrap_or(&[]),
            if key == WILDCARD_KEY {
                &[]
            } else {
                index.get(WILDCARD_KEY).map(Vec::as_slice).unwrap_or(&[])
            },
        ];
        for bucket in buckets {
            for entry in bucket {
                let selector_matches = entry
                    .config
                    .selector_path
                    .as_ref()
                    .is_some_and(|p| p.matches(path, context));
                if !selector_matches {
                    continue;
                }
                if let Some(condition) = &entry.config.condition {
                    if !condition.evaluate(context.eval_context()) {
                        continue;
                    }
                }
                matched.push(entry.clone());
            }
        }
        matched
    }

    fn fire<F>(
        &self,
        entry: &DispatchEntry,
        context: &mut ExecutionContext,
        callback: F,
    ) -> Result<(), FilterError>
    where
        F: FnOnce(&mut ExecutionContext) -> Result<(), VisitError>,
    {
        if context.is_terminated() {
            return Err(FilterError::Terminated);
        }
        callback(context).map_err(|source| FilterError::Visitor {
            selector: entry.config.selector().to_string(),
            resource: entry.handler.name().to_string(),
            source,
        })
    }
}
