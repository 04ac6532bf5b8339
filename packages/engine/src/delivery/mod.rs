//! Content delivery: visitor capabilities, dispatch indices, planning, and
//! the streaming filter that drives events through them.

pub mod filter;
pub mod planner;
pub mod runtime;

use crate::error::VisitResult;
use crate::resource::ResourceConfig;
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use filter::{ElementView, ExecutionContext, Filter, SaxEvent, XmlReader};
pub use planner::{DispatchPlanner, PlanningEvent, PositionCounter};
pub use runtime::{ContentDeliveryConfigBuilder, EngineRuntimeFactory, ExecutionRuntime, ReaderPool};

bitflags! {
    /// Capability set a handler exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VisitorCapabilities: u8 {
        const BEFORE = 0b001;
        const CHILDREN = 0b010;
        const AFTER = 0b100;
    }
}

/// Fires when a matched element opens.
pub trait BeforeVisitor: Send + Sync {
    fn visit_before(&self, element: &ElementView, context: &mut ExecutionContext) -> VisitResult;
}

/// Fires once per direct child event of a matched element.
pub trait ChildrenVisitor: Send + Sync {
    fn visit_child_text(&self, _text: &str, _context: &mut ExecutionContext) -> VisitResult {
        Ok(())
    }

    fn visit_child_element(
        &self,
        _child: &ElementView,
        _context: &mut ExecutionContext,
    ) -> VisitResult {
        Ok(())
    }
}

/// Fires when a matched element closes.
pub trait AfterVisitor: Send + Sync {
    fn visit_after(&self, element: &ElementView, context: &mut ExecutionContext) -> VisitResult;
}

/// A handler is a named bundle of per-capability visitor slots. Capability
/// is defined by which slots are filled, not by type inheritance.
#[derive(Clone)]
pub struct ContentHandler {
    name: String,
    pub before: Option<Arc<dyn BeforeVisitor>>,
    pub children: Option<Arc<dyn ChildrenVisitor>>,
    pub after: Option<Arc<dyn AfterVisitor>>,
}

impl ContentHandler {
    pub fn new(name: impl Into<String>) -> Self {
        ContentHandler {
            name: name.into(),
            before: None,
            children: None,
            after: None,
        }
    }

    pub fn with_before(mut self, visitor: Arc<dyn BeforeVisitor>) -> Self {
        self.before = Some(visitor);
        self
    }

    pub fn with_children(mut self, visitor: Arc<dyn ChildrenVisitor>) -> Self {
        self.children = Some(visitor);
        self
    }

    pub fn with_after(mut self, visitor: Arc<dyn AfterVisitor>) -> Self {
        self.after = Some(visitor);
        self
    }

    /// Implementation name, used in planning events and error reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> VisitorCapabilities {
        let mut caps = VisitorCapabilities::empty();
        if self.before.is_some() {
            caps |= VisitorCapabilities::BEFORE;
        }
        if self.children.is_some() {
            caps |= VisitorCapabilities::CHILDREN;
        }
        if self.after.is_some() {
            caps |= VisitorCapabilities::AFTER;
        }
        caps
    }
}

impl fmt::Debug for ContentHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHandler")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// A visitor binding presented to the planner.
#[derive(Debug, Clone)]
pub struct ContentHandlerBinding {
    pub config: Arc<ResourceConfig>,
    pub handler: ContentHandler,
}

impl ContentHandlerBinding {
    pub fn new(config: ResourceConfig, handler: ContentHandler) -> Self {
        ContentHandlerBinding {
            config: Arc::new(config),
            handler,
        }
    }
}

/// A wrapper inserted around user handlers by the interceptor chain.
pub trait VisitorInterceptor: Send + Sync {
    fn intercept(&self, inner: &ContentHandler) -> ContentHandler;
}

/// Builds the interceptor pipeline around a handler. The wrapped handler
/// always exposes the union of the underlying chain's capabilities: slots an
/// interceptor leaves empty fall through to the handler beneath it.
pub struct InterceptorChainFactory {
    interceptors: Vec<Arc<dyn VisitorInterceptor>>,
}

impl InterceptorChainFactory {
    pub fn new() -> Self {
        InterceptorChainFactory {
            interceptors: Vec::new(),
        }
    }

    pub fn add(&mut self, interceptor: Arc<dyn VisitorInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn wrap(&self, handler: ContentHandler) -> ContentHandler {
        let mut current = handler;
        for interceptor in &self.interceptors {
            let mut wrapped = interceptor.intercept(&current);
            if wrapped.before.is_none() {
                wrapped.before = current.before.clone();
            }
            if wrapped.children.is_none() {
                wrapped.children = current.children.clone();
            }
            if wrapped.after.is_none() {
                wrapped.after = current.after.clone();
            }
            current = wrapped;
        }
        current
    }
}

impl Default for InterceptorChainFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// An indexed `(resource-config, handler)` pair.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub config: Arc<ResourceConfig>,
    pub handler: ContentHandler,
}

/// The planner's output: Before/Child/After indices keyed by the dispatch
/// key (last element local name), with a distinct `"*"` bucket, plus the
/// position counters and the planning event log. Immutable once built.
#[derive(Debug, Default)]
pub struct ContentDeliveryConfig {
    pub(crate) before: HashMap<String, Vec<DispatchEntry>>,
    pub(crate) child: HashMap<String, Vec<DispatchEntry>>,
    pub(crate) after: HashMap<String, Vec<DispatchEntry>>,
    pub(crate) counters: HashMap<String, Vec<PositionCounter>>,
    pub(crate) counter_count: usize,
    pub(crate) events: Vec<PlanningEvent>,
}

impl ContentDeliveryConfig {
    pub fn before(&self, key: &str) -> &[DispatchEntry] {
        self.before.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn child(&self, key: &str) -> &[DispatchEntry] {
        self.child.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn after(&self, key: &str) -> &[DispatchEntry] {
        self.after.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn counters(&self, key: &str) -> &[PositionCounter] {
        self.counters.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of position counters bound by the planner; sizes per-execution
    /// counter state.
    pub fn counter_count(&self) -> usize {
        self.counter_count
    }

    pub fn events(&self) -> &[PlanningEvent] {
        &self.events
    }

    /// Planning events rendered as JSON for external reporting tools.
    pub fn events_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).unwrap_or_default()
    }
}
