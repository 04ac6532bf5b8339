//! XML config digester
//!
//! Parses a `.cdrl` document into a [`ResourceConfigSeq`], recursing into
//! imports with textual parameter substitution, registering conditions and
//! profiles, and handing extension-namespace elements to their nested
//! digesters. A frame stack scopes condition lookups and detects import
//! cycles; the rendered stack is attached to every error.

pub mod extension;
pub mod uri;

use crate::error::{ConfigError, ConfigResult};
use crate::expression::{ExpressionEvaluator, ExpressionEvaluatorFactory};
use crate::loader::ResourceLoader;
use crate::resource::{
    Parameter, ResourceConfig, ResourceConfigFactoryRegistry, GLOBAL_PARAMETERS,
    SAX_DRIVER_SELECTOR,
};
use crate::selector::SelectorPathParser;
use crate::sequence::{ProfileSet, ResourceConfigSeq};
use crate::xml::{parse_document, Element};
use extension::{ExtensionDigester, ExtensionVisitorRegistry};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Namespace every config document must declare as its default.
pub const SMOOKS_NAMESPACE: &str = "https://www.smooks.org/xsd/smooks-2.0.xsd";

/// Local name of the config document root.
pub const ROOT_ELEMENT: &str = "smooks-resource-list";

/// Whether digestion is processing a root config or an extension config.
/// Passed explicitly so concurrent digestions cannot observe each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMode {
    Root,
    Extension,
}

/// Root-element defaults propagated to child resource configs.
#[derive(Debug, Clone, Default)]
pub struct DocumentDefaults {
    pub target_profile: Option<String>,
    pub condition_ref: Option<String>,
}

/// One document on the digestion stack.
#[derive(Debug)]
struct ConfigFrame {
    file_name: String,
    /// Normalized URI; cycle-detection identity.
    file_uri: String,
    evaluators: HashMap<String, Arc<dyn ExpressionEvaluator>>,
}

/// Digests config documents into resource-config sequences.
pub struct XmlConfigDigester {
    evaluators: Arc<ExpressionEvaluatorFactory>,
    selectors: SelectorPathParser,
    factories: ResourceConfigFactoryRegistry,
    extension_visitors: Arc<ExtensionVisitorRegistry>,
    extension_cache: HashMap<String, Arc<ExtensionDigester>>,
    stack: Vec<ConfigFrame>,
}

impl XmlConfigDigester {
    pub fn new() -> Self {
        let evaluators = Arc::new(ExpressionEvaluatorFactory::new());
        XmlConfigDigester {
            selectors: SelectorPathParser::with_evaluators(Arc::clone(&evaluators)),
            evaluators,
            factories: ResourceConfigFactoryRegistry::new(),
            extension_visitors: Arc::new(ExtensionVisitorRegistry::new()),
            extension_cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Registry of `factory=`-named resource-config factories.
    pub fn factories_mut(&mut self) -> &mut ResourceConfigFactoryRegistry {
        &mut self.factories
    }

    /// Replace the extension visitor registry, e.g. to add custom visitors.
    pub fn with_extension_visitors(mut self, visitors: ExtensionVisitorRegistry) -> Self {
        self.extension_visitors = Arc::new(visitors);
        self
    }

    /// The cached extension digester for a namespace, if one was loaded.
    pub fn extension_digester(&self, namespace: &str) -> Option<Arc<ExtensionDigester>> {
        self.extension_cache.get(namespace).map(Arc::clone)
    }

    /// Digest a root config document.
    pub fn digest(
        &mut self,
        source: &str,
        base_uri: &str,
        loader: &dyn ResourceLoader,
    ) -> ConfigResult<ResourceConfigSeq> {
        self.digest_in_mode(source, base_uri, loader, DigestMode::Root)
    }

    pub fn digest_in_mode(
        &mut self,
        source: &str,
        base_uri: &str,
        loader: &dyn ResourceLoader,
        mode: DigestMode,
    ) -> ConfigResult<ResourceConfigSeq> {
        self.stack.clear();
        self.stack.push(ConfigFrame {
            file_name: "root".to_string(),
            file_uri: uri::normalize(base_uri),
            evaluators: HashMap::new(),
        });
        let result = self.digest_root(source, base_uri, loader, mode);
        self.stack.pop();
        result
    }

    fn digest_root(
        &mut self,
        source: &str,
        base_uri: &str,
        loader: &dyn ResourceLoader,
        mode: DigestMode,
    ) -> ConfigResult<ResourceConfigSeq> {
        debug!("digesting config '{}'", base_uri);
        let mut seq = ResourceConfigSeq::new(base_uri);
        self.digest_into(source, base_uri, loader, mode, &mut seq)?;
        if seq.is_empty() {
            return Err(ConfigError::EmptyConfiguration {
                config_path: self.current_path(),
            });
        }
        Ok(seq)
    }

    fn digest_into(
        &mut self,
        source: &str,
        base_uri: &str,
        loader: &dyn ResourceLoader,
        mode: DigestMode,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        let root = parse_document(source, base_uri).map_err(|e| ConfigError::SchemaInvalid {
            message: e.to_string(),
            config_path: self.current_path(),
        })?;

        match root.namespace.as_deref() {
            Some(SMOOKS_NAMESPACE) => {}
            other => {
                return Err(ConfigError::UnsupportedNamespace {
                    namespace: other.unwrap_or("<none>").to_string(),
                    config_path: self.current_path(),
                })
            }
        }
        if root.name.local != ROOT_ELEMENT {
            return Err(ConfigError::SchemaInvalid {
                message: format!("unexpected root element '{}'", root.name.local),
                config_path: self.current_path(),
            });
        }

        let defaults = DocumentDefaults {
            target_profile: root.attr("default-target-profile").map(str::to_string),
            condition_ref: root.attr("default-condition-ref").map(str::to_string),
        };

        for child in root.child_elements() {
            if child.namespace.as_deref() == Some(SMOOKS_NAMESPACE) {
                if mode == DigestMode::Extension
                    && !matches!(child.name.local.as_str(), "import" | "resource-config")
                {
                    return Err(ConfigError::IllegalExtensionElement {
                        element: child.name.local.clone(),
                        config_path: self.current_path(),
                    });
                }
                match child.name.local.as_str() {
                    "params" => self.digest_params(child, seq)?,
                    "conditions" => self.digest_conditions(child)?,
                    "profiles" => self.digest_profiles(child, seq)?,
                    "import" => self.digest_import(child, base_uri, loader, mode, seq)?,
                    "reader" => self.digest_reader(child, &defaults, seq)?,
                    "resource-config" => self.digest_resource_config(child, &defaults, seq)?,
                    other => {
                        return Err(ConfigError::SchemaInvalid {
                            message: format!("unknown element '{}'", other),
                            config_path: self.current_path(),
                        })
                    }
                }
            } else if mode == DigestMode::Extension {
                return Err(ConfigError::IllegalExtensionElement {
                    element: child.name.raw(),
                    config_path: self.current_path(),
                });
            } else {
                self.digest_extension_element(child, loader, &defaults, seq)?;
            }
        }
        Ok(())
    }

    fn digest_params(&mut self, element: &Element, seq: &mut ResourceConfigSeq) -> ConfigResult<()> {
        let mut config = ResourceConfig::for_selector(GLOBAL_PARAMETERS)?;
        for param in element.child_elements().filter(|e| e.name.local == "param") {
            config.parameters.add(self.read_param(param)?);
        }
        seq.add(config);
        Ok(())
    }

    fn digest_conditions(&mut self, element: &Element) -> ConfigResult<()> {
        for condition in element
            .child_elements()
            .filter(|e| e.name.local == "condition")
        {
            let id = condition.attr("id").ok_or_else(|| ConfigError::SchemaInvalid {
                message: "condition requires an id".to_string(),
                config_path: self.current_path(),
            })?;
            let frame = self.stack.last().expect("digestion stack is never empty");
            if frame.evaluators.contains_key(id) {
                return Err(ConfigError::DuplicateConditionId {
                    id: id.to_string(),
                    config_path: self.current_path(),
                });
            }
            let evaluator = self
                .evaluators
                .create(condition.attr("evaluator"), &condition.text())
                .map_err(|e| e.with_config_path(&self.current_path()))?;
            let id = id.to_string();
            self.stack
                .last_mut()
                .expect("digestion stack is never empty")
                .evaluators
                .insert(id, evaluator);
        }
        Ok(())
    }

    fn digest_profiles(
        &mut self,
        element: &Element,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        for profile in element
            .child_elements()
            .filter(|e| e.name.local == "profile")
        {
            let base = profile
                .attr("base-profile")
                .ok_or_else(|| ConfigError::SchemaInvalid {
                    message: "profile requires a base-profile".to_string(),
                    config_path: self.current_path(),
                })?;
            let subs = profile
                .attr("sub-profiles")
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            seq.add_profile_set(ProfileSet::new(base, subs))
                .map_err(|e| e.with_config_path(&self.current_path()))?;
        }
        Ok(())
    }

    fn digest_import(
        &mut self,
        element: &Element,
        base_uri: &str,
        loader: &dyn ResourceLoader,
        mode: DigestMode,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        let file = element.attr("file").ok_or_else(|| ConfigError::SchemaInvalid {
            message: "import requires a file".to_string(),
            config_path: self.current_path(),
        })?;
        let resolved = uri::resolve(base_uri, file);

        let mut substitutions: Vec<(String, String)> = Vec::new();
        for param in element.child_elements().filter(|e| e.name.local == "param") {
            let name = param.attr("name").ok_or_else(|| ConfigError::SchemaInvalid {
                message: "import param requires a name".to_string(),
                config_path: self.current_path(),
            })?;
            substitutions.push((name.to_string(), param.inner_xml()));
        }

        self.push_frame(&resolved)?;
        let result = (|| {
            let loaded = loader.load(&resolved).map_err(|e| ConfigError::ImportIo {
                uri: resolved.clone(),
                config_path: self.current_path(),
                source: e,
            })?;
            let mut substituted = loaded;
            for (name, value) in &substitutions {
                substituted = substituted.replace(&format!("@{}@", name), value);
            }
            self.digest_into(&substituted, &resolved, loader, mode, seq)
        })();
        self.pop_frame();
        result
    }

    fn digest_reader(
        &mut self,
        element: &Element,
        defaults: &DocumentDefaults,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        let mut config = ResourceConfig::for_selector(SAX_DRIVER_SELECTOR)?;
        config.resource_locator = element.attr("class").map(str::to_string);
        config.target_profile = element
            .attr("target-profile")
            .map(str::to_string)
            .or_else(|| defaults.target_profile.clone());

        if let Some(handlers) = element
            .child_elements()
            .find(|e| e.name.local == "handlers")
        {
            for handler in handlers
                .child_elements()
                .filter(|e| e.name.local == "handler")
            {
                let class = handler
                    .attr("class")
                    .ok_or_else(|| ConfigError::SchemaInvalid {
                        message: "reader handler requires a class".to_string(),
                        config_path: self.current_path(),
                    })?;
                config.parameters.add(Parameter::new("sax-handler", class));
            }
        }
        if let Some(features) = element
            .child_elements()
            .find(|e| e.name.local == "features")
        {
            for feature in features.child_elements() {
                let name = match feature.name.local.as_str() {
                    "setOn" => "feature-on",
                    "setOff" => "feature-off",
                    other => {
                        return Err(ConfigError::SchemaInvalid {
                            message: format!("unknown reader feature element '{}'", other),
                            config_path: self.current_path(),
                        })
                    }
                };
                let value = feature
                    .attr("feature")
                    .ok_or_else(|| ConfigError::SchemaInvalid {
                        message: "reader feature requires a feature URI".to_string(),
                        config_path: self.current_path(),
                    })?;
                config.parameters.add(Parameter::new(name, value));
            }
        }
        if let Some(params) = element.child_elements().find(|e| e.name.local == "params") {
            for param in params.child_elements().filter(|e| e.name.local == "param") {
                config.parameters.add(self.read_param(param)?);
            }
        }
        seq.add(config);
        Ok(())
    }

    fn digest_resource_config(
        &mut self,
        element: &Element,
        defaults: &DocumentDefaults,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        let factory = self
            .factories
            .get(element.attr("factory"))
            .map_err(|e| e.with_config_path(&self.current_path()))?;
        let mut config = factory
            .create(element, &self.selectors, defaults.target_profile.as_deref())
            .map_err(|e| e.with_config_path(&self.current_path()))?;

        let condition_element = element
            .child_elements()
            .find(|e| e.name.local == "condition");
        config.condition = match condition_element {
            Some(condition) => Some(self.condition_from_element(condition)?),
            None => match &defaults.condition_ref {
                Some(id_ref) => Some(self.lookup_condition(id_ref)?),
                None => None,
            },
        };

        for param in element.child_elements().filter(|e| e.name.local == "param") {
            config.parameters.add(self.read_param(param)?);
        }
        seq.add(config);
        Ok(())
    }

    fn condition_from_element(
        &self,
        element: &Element,
    ) -> ConfigResult<Arc<dyn ExpressionEvaluator>> {
        if let Some(id_ref) = element.attr("idRef") {
            return self.lookup_condition(id_ref);
        }
        self.evaluators
            .create(element.attr("evaluator"), &element.text())
            .map_err(|e| e.with_config_path(&self.current_path()))
    }

    /// Walk the frame stack, innermost first, for a registered condition.
    fn lookup_condition(&self, id_ref: &str) -> ConfigResult<Arc<dyn ExpressionEvaluator>> {
        for frame in self.stack.iter().rev() {
            if let Some(evaluator) = frame.evaluators.get(id_ref) {
                return Ok(Arc::clone(evaluator));
            }
        }
        Err(ConfigError::UnknownConditionIdRef {
            id_ref: id_ref.to_string(),
            config_path: self.current_path(),
        })
    }

    fn digest_extension_element(
        &mut self,
        element: &Element,
        loader: &dyn ResourceLoader,
        defaults: &DocumentDefaults,
        seq: &mut ResourceConfigSeq,
    ) -> ConfigResult<()> {
        let namespace = element
            .namespace
            .clone()
            .ok_or_else(|| ConfigError::SchemaInvalid {
                message: format!("element '{}' has no namespace", element.name.raw()),
                config_path: self.current_path(),
            })?;

        let cached = self.extension_cache.get(&namespace).map(Arc::clone);
        let digester = match cached {
            Some(digester) => digester,
            None => {
                let digester = self.load_extension_digester(&namespace, loader)?;
                self.extension_cache
                    .insert(namespace.clone(), Arc::clone(&digester));
                digester
            }
        };

        let resources = digester
            .digest_element(element, defaults)
            .map_err(|e| e.with_config_path(&self.current_path()))?;
        for resource in resources {
            seq.add(resource);
        }
        Ok(())
    }

    fn load_extension_digester(
        &self,
        namespace: &str,
        loader: &dyn ResourceLoader,
    ) -> ConfigResult<Arc<ExtensionDigester>> {
        let resource = extension::extension_resource_path(namespace);
        debug!(
            "loading extension config '{}' for namespace '{}'",
            resource, namespace
        );
        let source = loader
            .load(&resource)
            .map_err(|_| ConfigError::ExtensionResourceMissing {
                namespace: namespace.to_string(),
                resource: resource.clone(),
                config_path: self.current_path(),
            })?;

        // The extension config digests through its own self-contained
        // digester, in extension mode.
        let mut nested = XmlConfigDigester::new();
        let config = nested.digest_in_mode(&source, &resource, loader, DigestMode::Extension)?;
        Ok(Arc::new(ExtensionDigester::new(
            namespace.to_string(),
            config,
            Arc::clone(&self.extension_visitors),
        )))
    }

    fn read_param(&self, element: &Element) -> ConfigResult<Parameter> {
        let name = element.attr("name").ok_or_else(|| ConfigError::SchemaInvalid {
            message: "param requires a name".to_string(),
            config_path: self.current_path(),
        })?;
        let mut parameter = Parameter::new(name, element.text().trim());
        if let Some(param_type) = element.attr("type") {
            parameter = parameter.with_type(param_type);
        }
        Ok(parameter)
    }

    fn push_frame(&mut self, resolved_uri: &str) -> ConfigResult<()> {
        let normalized = uri::normalize(resolved_uri);
        if self.stack.iter().any(|f| f.file_uri == normalized) {
            return Err(ConfigError::ImportCycle {
                uri: resolved_uri.to_string(),
                config_path: self.current_path(),
            });
        }
        self.stack.push(ConfigFrame {
            file_name: uri::file_name(resolved_uri).to_string(),
            file_uri: normalized,
            evaluators: HashMap::new(),
        });
        Ok(())
    }

    fn pop_frame(&mut self) {
        self.stack.pop();
    }

    /// The digestion stack rendered as `/[root]/[imported.xml]`.
    fn current_path(&self) -> String {
        let mut path = String::new();
        for frame in &self.stack {
            path.push_str("/[");
            path.push_str(&frame.file_name);
            path.push(']');
        }
        path
    }
}

impl Default for XmlConfigDigester {
    fn default() -> Self {
        Self::new()
    }
}
