//! Streaming content-transformation engine
//!
//! The engine digests a declarative XML pipeline description (a `.cdrl`
//! document) into an indexed table of selector-bound visitors, then drives a
//! SAX-style event stream through those visitors so each matching element
//! fires its Before/Child/After callbacks in document order.
//!
//! The crate splits along the processing pipeline:
//! raw config stream -> [`digester`] (using [`selector`] and [`expression`])
//! -> [`sequence`] -> [`delivery::DispatchPlanner`] ->
//! [`delivery::ContentDeliveryConfig`] -> [`delivery::EngineRuntimeFactory`].

// Core modules
pub mod chars;
pub mod error;
pub mod expression;
pub mod loader;
pub mod parse_util;

// Config model
pub mod resource;
pub mod selector;
pub mod sequence;

// Parsing and digestion
pub mod digester;
pub mod xml;

// Dispatch planning and execution
pub mod delivery;

// Re-exports
pub use delivery::{
    AfterVisitor, BeforeVisitor, ChildrenVisitor, ContentDeliveryConfig, ContentHandler,
    ContentHandlerBinding, DispatchPlanner, EngineRuntimeFactory, ExecutionContext,
    ExecutionRuntime, Filter, VisitorCapabilities, XmlReader,
};
pub use digester::{DigestMode, XmlConfigDigester, SMOOKS_NAMESPACE};
pub use error::{ConfigError, ConfigResult, FilterError, VisitResult};
pub use expression::{EvalContext, ExpressionEvaluator, ExpressionEvaluatorFactory};
pub use loader::{FsResourceLoader, MapResourceLoader, ResourceLoader};
pub use resource::{ParamMap, Parameter, ResourceConfig};
pub use selector::{SelectorPath, SelectorPathParser};
pub use sequence::{ProfileSet, ResourceConfigSeq};
