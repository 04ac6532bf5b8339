//! Extension-namespace digestion
//!
//! An element in a non-core namespace is rewritten by a nested digester
//! loaded from `/META-INF<namespace-path>-smooks.xml`. The nested config
//! binds extension visitors (by resource-locator name) which run over the
//! extension element's subtree and append the resource configs it stands
//! for to the shared extension context.

use super::uri::split_scheme;
use super::DocumentDefaults;
use crate::delivery::{
    BeforeVisitor, ContentHandler, ContentHandlerBinding, DispatchPlanner, ElementView,
    ExecutionContext, Filter,
};
use crate::error::{ConfigError, ConfigResult, VisitResult};
use crate::resource::{Parameter, ResourceConfig};
use crate::selector::SelectorPathParser;
use crate::sequence::ResourceConfigSeq;
use crate::xml::Element;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Classpath location of the extension config for a namespace URI.
pub fn extension_resource_path(namespace: &str) -> String {
    let (_, rest) = split_scheme(namespace);
    let path = if let Some(stripped) = rest.strip_prefix("//") {
        match stripped.find('/') {
            Some(idx) => &stripped[idx..],
            None => "",
        }
    } else {
        rest
    };
    if path.starts_with('/') {
        format!("/META-INF{}-smooks.xml", path)
    } else {
        format!("/META-INF/{}-smooks.xml", path)
    }
}

/// Mutable state shared by the extension visitors of one rewrite run.
#[derive(Debug, Default)]
pub struct ExtensionContext {
    resources: Vec<ResourceConfig>,
    default_profile: Option<String>,
}

impl ExtensionContext {
    fn new(default_profile: Option<String>) -> Self {
        ExtensionContext {
            resources: Vec::new(),
            default_profile,
        }
    }

    pub fn push(&mut self, config: ResourceConfig) {
        self.resources.push(config);
    }

    /// The resource config most recently started by the pipeline.
    pub fn current_mut(&mut self) -> Option<&mut ResourceConfig> {
        self.resources.last_mut()
    }
}

type SharedContext = Arc<Mutex<ExtensionContext>>;

/// Constructs an extension visitor from its resource config.
pub type ExtensionVisitorConstructor =
    fn(&ResourceConfig, SharedContext) -> ConfigResult<ContentHandler>;

/// Extension visitors keyed by resource-locator name.
pub struct ExtensionVisitorRegistry {
    constructors: HashMap<String, ExtensionVisitorConstructor>,
}

impl ExtensionVisitorRegistry {
    pub fn new() -> Self {
        let mut registry = ExtensionVisitorRegistry {
            constructors: HashMap::new(),
        };
        registry.register("new-resource-config", new_resource_config_visitor);
        registry.register("map-to-attribute", map_to_attribute_visitor);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: ExtensionVisitorConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn construct(
        &self,
        name: &str,
        config: &ResourceConfig,
        context: SharedContext,
    ) -> ConfigResult<ContentHandler> {
        let constructor =
            self.constructors
                .get(name)
                .ok_or_else(|| ConfigError::FactoryInstantiation {
                    class_name: name.to_string(),
                    message: "no extension visitor registered under this name".to_string(),
                    config_path: String::new(),
                })?;
        constructor(config, context)
    }
}

impl Default for ExtensionVisitorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn new_resource_config_visitor(
    config: &ResourceConfig,
    context: SharedContext,
) -> ConfigResult<ContentHandler> {
    Ok(ContentHandler::new("new-resource-config").with_before(Arc::new(NewResourceConfig {
        selector: config
            .parameters
            .first("selector")
            .map(|p| p.value.clone()),
        resource: config
            .parameters
            .first("resource")
            .map(|p| p.value.clone()),
        context,
    })))
}

/// Starts a fresh resource config when its selector matches.
struct NewResourceConfig {
    selector: Option<String>,
    resource: Option<String>,
    context: SharedContext,
}

impl BeforeVisitor for NewResourceConfig {
    fn visit_before(&self, _element: &ElementView, _context: &mut ExecutionContext) -> VisitResult {
        let mut config = match &self.selector {
            Some(selector) => {
                let path = SelectorPathParser::new().parse(selector, &HashMap::new())?;
                ResourceConfig::new(path)
            }
            None => ResourceConfig::without_selector(),
        };
        config.resource_locator = self.resource.clone();
        let mut shared = self.context.lock().unwrap();
        config.target_profile = shared.default_profile.clone();
        shared.push(config);
        Ok(())
    }
}

fn map_to_attribute_visitor(
    config: &ResourceConfig,
    context: SharedContext,
) -> ConfigResult<ContentHandler> {
    let attribute = config
        .parameters
        .first("attribute")
        .map(|p| p.value.clone())
        .ok_or_else(|| ConfigError::FactoryInstantiation {
            class_name: "map-to-attribute".to_string(),
            message: "requires an 'attribute' parameter".to_string(),
            config_path: String::new(),
        })?;
    let map_to = config
        .parameters
        .first("mapTo")
        .map(|p| p.value.clone())
        .unwrap_or_else(|| attribute.clone());
    Ok(ContentHandler::new("map-to-attribute").with_before(Arc::new(MapToAttribute {
        attribute,
        map_to,
        default_value: config
            .parameters
            .first("default")
            .map(|p| p.value.clone()),
        context,
    })))
}

/// Copies an attribute of the matched element onto the current resource
/// config: `selector`, `resource`, and `target-profile` map to the config's
/// own properties, anything else becomes a parameter.
struct MapToAttribute {
    attribute: String,
    map_to: String,
    default_value: Option<String>,
    context: SharedContext,
}

impl BeforeVisitor for MapToAttribute {
    fn visit_before(&self, element: &ElementView, _context: &mut ExecutionContext) -> VisitResult {
        let value = match element.attr(&self.attribute).map(str::to_string) {
            Some(value) => value,
            None => match &self.default_value {
                Some(default) => default.clone(),
                None => {
                    return Err(format!(
                        "element '{}' has no '{}' attribute and no default is configured",
                        element.local, self.attribute
                    )
                    .into())
                }
            },
        };
        let mut shared = self.context.lock().unwrap();
        let Some(current) = shared.current_mut() else {
            return Err("no resource config started by the extension pipeline".into());
        };
        match self.map_to.as_str() {
            "selector" => {
                current.selector_path =
                    Some(SelectorPathParser::new().parse(&value, &HashMap::new())?);
            }
            "resource" => current.resource_locator = Some(value),
            "target-profile" => current.target_profile = Some(value),
            name => current.parameters.add(Parameter::new(name, value)),
        }
        Ok(())
    }
}

/// A nested digester for one extension namespace: the digested extension
/// config plus the visitor registry, reused for every element in that
/// namespace.
pub struct ExtensionDigester {
    namespace: String,
    config: ResourceConfigSeq,
    visitors: Arc<ExtensionVisitorRegistry>,
}

impl ExtensionDigester {
    pub fn new(
        namespace: String,
        config: ResourceConfigSeq,
        visitors: Arc<ExtensionVisitorRegistry>,
    ) -> Self {
        ExtensionDigester {
            namespace,
            config,
            visitors,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &ResourceConfigSeq {
        &self.config
    }

    /// Run the extension element's subtree through this namespace's pipeline
    /// and collect the resource configs it produced.
    pub fn digest_element(
        &self,
        element: &Element,
        defaults: &DocumentDefaults,
    ) -> ConfigResult<Vec<ResourceConfig>> {
        let context = Arc::new(Mutex::new(ExtensionContext::new(
            defaults.target_profile.clone(),
        )));

        let mut bindings = Vec::new();
        for config in self.config.iter() {
            let Some(locator) = config.resource_locator.as_deref() else {
                continue;
            };
            if config.selector_path.is_none() {
                continue;
            }
            let handler = self
                .visitors
                .construct(locator, config, Arc::clone(&context))?;
            bindings.push(ContentHandlerBinding {
                config: Arc::new(config.clone()),
                handler,
            });
        }

        let delivery = DispatchPlanner::new().plan(&bindings)?;
        let mut execution = ExecutionContext::new(&delivery);
        Filter::new(&delivery)
            .filter_fragment(element, &mut execution)
            .map_err(|e| ConfigError::SchemaInvalid {
                message: format!("extension pipeline for '{}' failed: {}", self.namespace, e),
                config_path: String::new(),
            })?;

        let mut shared = context.lock().unwrap();
        Ok(std::mem::take(&mut shared.resources))
    }
}
