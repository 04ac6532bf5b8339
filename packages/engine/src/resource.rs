//! Resource configuration model
//!
//! A resource config binds a selector path to a handler resource (class name
//! or URI) plus its parameters, an optional target profile, and an optional
//! condition.

use crate::error::{ConfigError, ConfigResult};
use crate::expression::ExpressionEvaluator;
use crate::selector::{SelectorPath, SelectorPathParser};
use crate::sequence::ProfileSet;
use crate::xml::Element;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Selector of the sentinel resource that collects `<params>` entries.
pub const GLOBAL_PARAMETERS: &str = "global-parameters";

/// Selector of the resource produced by a `<reader>` element.
pub const SAX_DRIVER_SELECTOR: &str = "org.xml.sax.driver";

/// One typed parameter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub param_type: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            value: value.into(),
            param_type: None,
        }
    }

    pub fn with_type(mut self, param_type: impl Into<String>) -> Self {
        self.param_type = Some(param_type.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

/// Parameter map: name to entry list, insertion-ordered, duplicate names
/// preserved in the order they were added. Never deduped — repeated names
/// (e.g. a reader's `sax-handler` entries) are meaningful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap {
    entries: IndexMap<String, Vec<Parameter>>,
}

impl ParamMap {
    pub fn new() -> Self {
        ParamMap::default()
    }

    pub fn add(&mut self, parameter: Parameter) {
        self.entries
            .entry(parameter.name.clone())
            .or_default()
            .push(parameter);
    }

    pub fn first(&self, name: &str) -> Option<&Parameter> {
        self.entries.get(name).and_then(|v| v.first())
    }

    /// All entries registered under a name, in insertion order.
    pub fn values(&self, name: &str) -> &[Parameter] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.entries.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single `(selector-path, resource, parameters, profile, condition)` unit.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub selector_path: Option<SelectorPath>,
    pub resource_locator: Option<String>,
    pub parameters: ParamMap,
    pub target_profile: Option<String>,
    pub condition: Option<Arc<dyn ExpressionEvaluator>>,
}

impl ResourceConfig {
    pub fn new(selector_path: SelectorPath) -> Self {
        ResourceConfig {
            selector_path: Some(selector_path),
            resource_locator: None,
            parameters: ParamMap::new(),
            target_profile: None,
            condition: None,
        }
    }

    /// A config with a plain selector string and no namespace table.
    pub fn for_selector(selector: &str) -> ConfigResult<Self> {
        let path = SelectorPathParser::new().parse(selector, &HashMap::new())?;
        Ok(ResourceConfig::new(path))
    }

    pub fn without_selector() -> Self {
        ResourceConfig {
            selector_path: None,
            resource_locator: None,
            parameters: ParamMap::new(),
            target_profile: None,
            condition: None,
        }
    }

    /// The selector text, for diagnostics.
    pub fn selector(&self) -> &str {
        self.selector_path
            .as_ref()
            .map(SelectorPath::source)
            .unwrap_or("<none>")
    }

    /// Identity used in error messages: the resource locator when present.
    pub fn resource_name(&self) -> &str {
        self.resource_locator.as_deref().unwrap_or("<anonymous>")
    }

    /// Whether this config applies under the given profile set. A config
    /// without a target applies everywhere; a comma-separated target list
    /// applies when any entry names the base profile or a sub-profile.
    pub fn is_target(&self, profiles: Option<&ProfileSet>) -> bool {
        let Some(target) = self.target_profile.as_deref() else {
            return true;
        };
        let Some(profiles) = profiles else {
            return false;
        };
        target
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .any(|t| profiles.is_member(t))
    }
}

/// Builds a [`ResourceConfig`] from a `<resource-config>` element.
pub trait ResourceConfigFactory: Send + Sync {
    fn create(
        &self,
        element: &Element,
        selectors: &SelectorPathParser,
        default_profile: Option<&str>,
    ) -> ConfigResult<ResourceConfig>;
}

/// Default factory: reads `selector`, `target-profile`, and the `<resource>`
/// child.
pub struct DefaultResourceConfigFactory;

impl ResourceConfigFactory for DefaultResourceConfigFactory {
    fn create(
        &self,
        element: &Element,
        selectors: &SelectorPathParser,
        default_profile: Option<&str>,
    ) -> ConfigResult<ResourceConfig> {
        let mut config = match element.attr("selector") {
            Some(selector) => {
                ResourceConfig::new(selectors.parse(selector, &element.namespaces)?)
            }
            None => ResourceConfig::without_selector(),
        };
        config.target_profile = element
            .attr("target-profile")
            .map(str::to_string)
            .or_else(|| default_profile.map(str::to_string));
        config.resource_locator = element
            .child_elements()
            .find(|e| e.name.local == "resource")
            .map(|e| e.text().trim().to_string());
        Ok(config)
    }
}

/// Name-keyed registry of resource-config factories.
pub struct ResourceConfigFactoryRegistry {
    factories: HashMap<String, Arc<dyn ResourceConfigFactory>>,
    default: Arc<dyn ResourceConfigFactory>,
}

impl ResourceConfigFactoryRegistry {
    pub fn new() -> Self {
        ResourceConfigFactoryRegistry {
            factories: HashMap::new(),
            default: Arc::new(DefaultResourceConfigFactory),
        }
    }

    pub fn register(&mut self, class_name: &str, factory: Arc<dyn ResourceConfigFactory>) {
        self.factories.insert(class_name.to_string(), factory);
    }

    /// Resolve by class name; `None` selects the default factory.
    pub fn get(&self, class_name: Option<&str>) -> ConfigResult<Arc<dyn ResourceConfigFactory>> {
        match class_name {
            None => Ok(Arc::clone(&self.default)),
            Some(name) => self.factories.get(name).map(Arc::clone).ok_or_else(|| {
                ConfigError::FactoryInstantiation {
                    class_name: name.to_string(),
                    message: "no resource config factory registered under this name".to_string(),
                    config_path: String::new(),
                }
            }),
        }
    }
}

impl Default for ResourceConfigFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
