//! Dispatch planner
//!
//! Builds the Before/Child/After dispatch indices from a list of visitor
//! bindings. Handlers are wrapped with the interceptor chain before
//! registration; position predicates get a bound counter; the index key is
//! the selector path's final element local name, with `"*"` as the bucket
//! for everything that cannot be keyed.

use super::{
    ContentDeliveryConfig, ContentHandlerBinding, DispatchEntry, InterceptorChainFactory,
    VisitorCapabilities,
};
use crate::error::{ConfigError, ConfigResult};
use crate::selector::{Predicate, SelectorPath, SelectorStep, WILDCARD_KEY};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Which index an entry was registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexKind {
    Before,
    Child,
    After,
}

/// A record of one planning decision.
#[derive(Debug, Clone, Serialize)]
pub enum PlanningEvent {
    HandlerRegistered {
        key: String,
        index: IndexKind,
        resource: String,
        selector: String,
    },
    HandlerSkipped {
        resource: String,
        reason: String,
    },
    CounterBound {
        key: String,
        prefix: String,
    },
}

/// A synthetic before-visitor counting starts of elements matching a path
/// prefix. Counter state lives in the execution context so planned indices
/// can be shared across concurrent executions.
#[derive(Debug, Clone)]
pub struct PositionCounter {
    pub id: usize,
    pub prefix: SelectorPath,
}

/// Plans visitor bindings into a [`ContentDeliveryConfig`].
pub struct DispatchPlanner {
    namespaces: HashMap<String, String>,
    interceptors: InterceptorChainFactory,
}

impl DispatchPlanner {
    pub fn new() -> Self {
        DispatchPlanner {
            namespaces: HashMap::new(),
            interceptors: InterceptorChainFactory::new(),
        }
    }

    /// Namespace declarations installed into selector paths compiled without
    /// a table of their own.
    pub fn with_namespaces(mut self, namespaces: HashMap<String, String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorChainFactory) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn plan(&self, bindings: &[ContentHandlerBinding]) -> ConfigResult<ContentDeliveryConfig> {
        let mut delivery = ContentDeliveryConfig::default();
        let mut next_counter = 0usize;

        for binding in bindings {
            let original_caps = binding.handler.capabilities();
            if !original_caps
                .intersects(VisitorCapabilities::BEFORE | VisitorCapabilities::AFTER)
            {
                // Children-only handlers belong to the DOM strategy.
                delivery.events.push(PlanningEvent::HandlerSkipped {
                    resource: binding.handler.name().to_string(),
                    reason: "not a streaming before/after visitor".to_string(),
                });
                continue;
            }

            let mut config = (*binding.config).clone();
            let Some(path) = config.selector_path.as_mut() else {
                delivery.events.push(PlanningEvent::HandlerSkipped {
                    resource: binding.handler.name().to_string(),
                    reason: "binding has no selector".to_string(),
                });
                continue;
            };
            if path.namespaces.is_empty() {
                path.namespaces = self.namespaces.clone();
            }

            // Before/Children visitors cannot sit on a text()-accessing
            // element: the text has not been seen when they fire.
            if original_caps
                .intersects(VisitorCapabilities::BEFORE | VisitorCapabilities::CHILDREN)
            {
                if let Some(target) = path.target_element() {
                    if target.accesses_text {
                        return Err(ConfigError::InvalidSelector {
                            selector: path.source().to_string(),
                            resource: binding.handler.name().to_string(),
                        });
                    }
                }
            }

            bind_position_counters(path, &mut next_counter, &mut delivery);

            let key = if path.is_indexed() {
                path.dispatch_key().to_string()
            } else {
                WILDCARD_KEY.to_string()
            };
            let selector = path.source().to_string();

            let wrapped = self.interceptors.wrap(binding.handler.clone());
            let wrapped_caps = wrapped.capabilities();
            let entry = DispatchEntry {
                config: Arc::new(config),
                handler: wrapped,
            };

            if wrapped_caps.contains(VisitorCapabilities::BEFORE)
                && original_caps.contains(VisitorCapabilities::BEFORE)
            {
                push_entry(&mut delivery, IndexKind::Before, &key, &selector, entry.clone());
                if original_caps.contains(VisitorCapabilities::CHILDREN) {
                    push_entry(&mut delivery, IndexKind::Child, &key, &selector, entry.clone());
                }
            }
            if wrapped_caps.contains(VisitorCapabilities::AFTER)
                && original_caps.contains(VisitorCapabilities::AFTER)
            {
                push_entry(&mut delivery, IndexKind::After, &key, &selector, entry.clone());
                // A handler that is both Before and After already registered
                // its Children capability above.
                if !original_caps.contains(VisitorCapabilities::BEFORE)
                    && original_caps.contains(VisitorCapabilities::CHILDREN)
                {
                    push_entry(&mut delivery, IndexKind::Child, &key, &selector, entry.clone());
                }
            }
        }

        delivery.counter_count = next_counter;
        debug!(
            "planned {} before, {} child, {} after dispatch keys, {} counters",
            delivery.before.len(),
            delivery.child.len(),
            delivery.after.len(),
            next_counter
        );
        Ok(delivery)
    }
}

impl Default for DispatchPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn push_entry(
    delivery: &mut ContentDeliveryConfig,
    index: IndexKind,
    key: &str,
    selector: &str,
    entry: DispatchEntry,
) {
    let resource = entry.handler.name().to_string();
    let map = match index {
        IndexKind::Before => &mut delivery.before,
        IndexKind::Child => &mut delivery.child,
        IndexKind::After => &mut delivery.after,
    };
    map.entry(key.to_string()).or_default().push(entry);
    delivery.events.push(PlanningEvent::HandlerRegistered {
        key: key.to_string(),
        index,
        resource,
        selector: selector.to_string(),
    });
}

/// Bind a counter to every position predicate in the path. The counter's
/// prefix is the path up to the predicated step, keeping only the predicates
/// that precede the position predicate within that step: positions count
/// elements that already passed the earlier predicates.
fn bind_position_counters(
    path: &mut SelectorPath,
    next_counter: &mut usize,
    delivery: &mut ContentDeliveryConfig,
) {
    let positions: Vec<(usize, usize)> = path
        .steps
        .iter()
        .enumerate()
        .filter_map(|(step_idx, step)| match step {
            SelectorStep::Element(element) => Some(
                element
                    .predicates
                    .iter()
                    .enumerate()
                    .filter_map(move |(pred_idx, p)| {
                        matches!(p, Predicate::Position { .. }).then_some((step_idx, pred_idx))
                    })
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .flatten()
        .collect();

    for (step_idx, pred_idx) in positions {
        let id = *next_counter;
        *next_counter += 1;

        let mut prefix_steps = path.steps[..=step_idx].to_vec();
        if let Some(SelectorStep::Element(last)) = prefix_steps.last_mut() {
            last.predicates.truncate(pred_idx);
            last.accesses_text = false;
        }
        let prefix = SelectorPath::from_parts(
            prefix_steps,
            path.namespaces.clone(),
            render_prefix(path, step_idx),
        );
        let key = prefix.dispatch_key().to_string();

        if let SelectorStep::Element(element) = &mut path.steps[step_idx] {
            if let Predicate::Position { counter, .. } = &mut element.predicates[pred_idx] {
                *counter = Some(id);
            }
        }

        delivery.events.push(PlanningEvent::CounterBound {
            key: key.clone(),
            prefix: prefix.source().to_string(),
        });
        delivery
            .counters
            .entry(key)
            .or_default()
            .push(PositionCounter { id, prefix });
    }
}

/// Render the prefix selector text for diagnostics: the element names up to
/// and including the predicated step.
fn render_prefix(path: &SelectorPath, step_idx: usize) -> String {
    let mut parts = Vec::new();
    for step in &path.steps[..=step_idx] {
        match step {
            SelectorStep::Document => parts.push(String::new()),
            SelectorStep::Element(e) => {
                parts.push(e.name.local_name().unwrap_or(WILDCARD_KEY).to_string())
            }
            _ => {}
        }
    }
    parts.join("/")
}
