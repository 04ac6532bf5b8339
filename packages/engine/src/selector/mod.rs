//! Selector paths
//!
//! A selector path is the compiled form of an XPath-subset selector string:
//! an ordered sequence of steps with predicates, carrying the namespace
//! prefix table that was in scope when it was compiled. Paths are matched
//! against the running element path at execution time.

mod parser;

pub use parser::SelectorPathParser;

use crate::expression::{EvalContext, ExpressionEvaluator};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Dispatch key used for paths that do not end in a concrete element name.
pub const WILDCARD_KEY: &str = "*";

/// Name test of an element step.
#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    /// `*`
    Any,
    Name {
        prefix: Option<String>,
        /// Namespace URI resolved from the prefix table at compile time.
        namespace: Option<String>,
        local: String,
    },
}

impl NameTest {
    pub fn local_name(&self) -> Option<&str> {
        match self {
            NameTest::Any => None,
            NameTest::Name { local, .. } => Some(local),
        }
    }
}

/// A predicate refining an element step.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// 1-based child position. The counter is bound by the dispatch planner;
    /// an unbound position predicate never matches.
    Position {
        position: usize,
        counter: Option<usize>,
    },
    AttributeEquals {
        name: String,
        value: String,
    },
    Expression(Arc<dyn ExpressionEvaluator>),
}

/// One element step of a path.
#[derive(Debug, Clone)]
pub struct ElementStep {
    pub name: NameTest,
    pub predicates: Vec<Predicate>,
    /// Set when a `text()` step follows this element.
    pub accesses_text: bool,
}

/// One step of a selector path.
#[derive(Debug, Clone)]
pub enum SelectorStep {
    /// Synthetic root produced by a leading `/`.
    Document,
    Element(ElementStep),
    Attribute { prefix: Option<String>, local: String },
    Text,
}

/// One open element of the running document path, as seen by matching.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFrame {
    pub local: String,
    pub namespace: Option<String>,
    /// Raw attribute name (prefix included) to value.
    pub attrs: Vec<(String, String)>,
}

impl PathFrame {
    pub fn new(local: impl Into<String>) -> Self {
        PathFrame {
            local: local.into(),
            namespace: None,
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Execution-time state predicates read during matching.
pub trait MatchContext {
    /// Current value of a planner-bound position counter.
    fn counter_value(&self, counter: usize) -> usize;
    fn eval_context(&self) -> &EvalContext;
}

/// Context with no counters and no values; matches structural selectors only.
pub struct StaticMatchContext {
    eval: EvalContext,
}

impl StaticMatchContext {
    pub fn new() -> Self {
        StaticMatchContext {
            eval: EvalContext::new(),
        }
    }
}

impl Default for StaticMatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchContext for StaticMatchContext {
    fn counter_value(&self, _counter: usize) -> usize {
        0
    }

    fn eval_context(&self) -> &EvalContext {
        &self.eval
    }
}

/// Compiled selector path.
#[derive(Debug, Clone)]
pub struct SelectorPath {
    pub steps: Vec<SelectorStep>,
    pub namespaces: HashMap<String, String>,
    source: String,
}

impl SelectorPath {
    pub(crate) fn from_parts(
        steps: Vec<SelectorStep>,
        namespaces: HashMap<String, String>,
        source: String,
    ) -> Self {
        SelectorPath {
            steps,
            namespaces,
            source,
        }
    }

    /// The selector text this path was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the path participates in element dispatch: its final step is
    /// an element step.
    pub fn is_indexed(&self) -> bool {
        matches!(self.steps.last(), Some(SelectorStep::Element(_)))
    }

    /// Index key for dispatch: the final element's local name, or the
    /// wildcard bucket for non-indexed and `*`-terminated paths.
    pub fn dispatch_key(&self) -> &str {
        match self.steps.last() {
            Some(SelectorStep::Element(step)) => step.name.local_name().unwrap_or(WILDCARD_KEY),
            _ => WILDCARD_KEY,
        }
    }

    /// The final element step, if any.
    pub fn target_element(&self) -> Option<&ElementStep> {
        self.steps.iter().rev().find_map(|s| match s {
            SelectorStep::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Whether the path is anchored at the document root by a leading `/`.
    pub fn is_anchored(&self) -> bool {
        matches!(self.steps.first(), Some(SelectorStep::Document))
    }

    /// Element steps in order, with their indices into `steps`.
    pub fn element_steps(&self) -> impl Iterator<Item = (usize, &ElementStep)> {
        self.steps.iter().enumerate().filter_map(|(i, s)| match s {
            SelectorStep::Element(e) => Some((i, e)),
            _ => None,
        })
    }

    /// Match this path against the current element path. Anchored paths must
    /// cover the whole path from the root; unanchored paths match any
    /// contiguous suffix. Predicates evaluate left to right and
    /// short-circuit on the first failure.
    pub fn matches(&self, path: &[PathFrame], context: &dyn MatchContext) -> bool {
        let steps: Vec<&ElementStep> = self.element_steps().map(|(_, s)| s).collect();
        if steps.is_empty() {
            // A document-only or attribute-only path never matches an element.
            return false;
        }
        if steps.len() > path.len() {
            return false;
        }
        if self.is_anchored() && steps.len() != path.len() {
            return false;
        }
        let offset = path.len() - steps.len();
        steps
            .into_iter()
            .zip(&path[offset..])
            .all(|(step, frame)| step_matches(step, frame, context))
    }
}

fn step_matches(step: &ElementStep, frame: &PathFrame, context: &dyn MatchContext) -> bool {
    match &step.name {
        NameTest::Any => {}
        NameTest::Name {
            namespace, local, ..
        } => {
            if local != &frame.local {
                return false;
            }
            if let Some(ns) = namespace {
                if frame.namespace.as_deref() != Some(ns.as_str()) {
                    return false;
                }
            }
        }
    }
    step.predicates
        .iter()
        .all(|p| predicate_matches(p, frame, context))
}

fn predicate_matches(predicate: &Predicate, frame: &PathFrame, context: &dyn MatchContext) -> bool {
    match predicate {
        Predicate::Position { position, counter } => match counter {
            Some(id) => context.counter_value(*id) == *position,
            None => false,
        },
        Predicate::AttributeEquals { name, value } => frame.attr(name) == Some(value.as_str()),
        Predicate::Expression(evaluator) => evaluator.evaluate(context.eval_context()),
    }
}

impl fmt::Display for SelectorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
