//! Engine error types
//!
//! Configuration errors are fatal to the digestion task that raised them and
//! carry the digestion path (`/[root]/[imported.xml]`) where one exists.
//! Execution-time failures are a separate kind so callers can tell a broken
//! configuration from a broken document run.

use std::time::Duration;
use thiserror::Error;

/// Result alias for configuration-time operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration at {config_path}: {message}")]
    SchemaInvalid { message: String, config_path: String },

    #[error("Unsupported default Namespace '{namespace}' at {config_path}")]
    UnsupportedNamespace {
        namespace: String,
        config_path: String,
    },

    #[error("0 Content Delivery Resource definitions loaded from {config_path}")]
    EmptyConfiguration { config_path: String },

    #[error("Invalid circular reference to config file '{uri}' at {config_path}")]
    ImportCycle { uri: String, config_path: String },

    #[error("failed to load config resource '{uri}' at {config_path}")]
    ImportIo {
        uri: String,
        config_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no condition registered for idRef '{id_ref}' at {config_path}")]
    UnknownConditionIdRef {
        id_ref: String,
        config_path: String,
    },

    #[error("duplicate condition id '{id}' at {config_path}")]
    DuplicateConditionId { id: String, config_path: String },

    #[error("empty condition expression at {config_path}")]
    EmptyConditionExpression { config_path: String },

    #[error("element '{element}' is not allowed in an extension configuration at {config_path}")]
    IllegalExtensionElement {
        element: String,
        config_path: String,
    },

    #[error("extension resource '{resource}' for namespace '{namespace}' not found at {config_path}")]
    ExtensionResourceMissing {
        namespace: String,
        resource: String,
        config_path: String,
    },

    #[error("invalid selector '{selector}' on resource '{resource}': a before/children visitor cannot target text()")]
    InvalidSelector { selector: String, resource: String },

    #[error("failed to instantiate '{class_name}' at {config_path}: {message}")]
    FactoryInstantiation {
        class_name: String,
        message: String,
        config_path: String,
    },

    #[error("duplicate profile '{base_profile}' in profile store at {config_path}")]
    DuplicateProfile {
        base_profile: String,
        config_path: String,
    },

    #[error("failed to parse selector '{selector}' at {config_path}: {message}")]
    InvalidSelectorSyntax {
        selector: String,
        message: String,
        config_path: String,
    },
}

impl ConfigError {
    /// Fill in the digestion path on variants that carry one and do not have
    /// it yet. Errors raised below the digester surface without a path; the
    /// digester annotates them on the way out.
    pub fn with_config_path(mut self, path: &str) -> Self {
        use ConfigError::*;
        let slot = match &mut self {
            SchemaInvalid { config_path, .. }
            | UnsupportedNamespace { config_path, .. }
            | EmptyConfiguration { config_path }
            | ImportCycle { config_path, .. }
            | ImportIo { config_path, .. }
            | UnknownConditionIdRef { config_path, .. }
            | DuplicateConditionId { config_path, .. }
            | EmptyConditionExpression { config_path }
            | IllegalExtensionElement { config_path, .. }
            | ExtensionResourceMissing { config_path, .. }
            | FactoryInstantiation { config_path, .. }
            | DuplicateProfile { config_path, .. }
            | InvalidSelectorSyntax { config_path, .. } => Some(config_path),
            _ => None,
        };
        if let Some(config_path) = slot {
            if config_path.is_empty() {
                *config_path = path.to_string();
            }
        }
        self
    }
}

/// Boxed error returned by user visitors.
pub type VisitError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for visitor callbacks.
pub type VisitResult = Result<(), VisitError>;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("timed out after {timeout:?} waiting for a pooled reader")]
    ReaderAcquisitionTimeout { timeout: Duration },

    #[error("filter execution was terminated")]
    Terminated,

    #[error("document is not well formed: {message}")]
    MalformedDocument { message: String },

    #[error("visitor '{resource}' failed on selector '{selector}'")]
    Visitor {
        selector: String,
        resource: String,
        #[source]
        source: VisitError,
    },
}
