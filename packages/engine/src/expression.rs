//! Condition expression evaluators
//!
//! A condition is a small predicate over named execution values. Evaluators
//! are constructed through a registry keyed on evaluator class names so
//! configurations can name alternative implementations; the default handles
//! the comparison subset used by inline conditions.

use crate::error::{ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name under which the default evaluator is registered.
pub const DEFAULT_EVALUATOR_NAME: &str = "default";

/// String-keyed view of execution values a condition can read.
#[derive(Debug, Default, Clone)]
pub struct EvalContext {
    values: HashMap<String, String>,
}

impl EvalContext {
    pub fn new() -> Self {
        EvalContext::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Capability implemented by every condition evaluator.
pub trait ExpressionEvaluator: Send + Sync + fmt::Debug {
    fn evaluate(&self, context: &EvalContext) -> bool;
    /// The source expression, for diagnostics.
    fn expression(&self) -> &str;
}

static COMPARISON_REGEXP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\w[\w.]*)\s*(==|!=)\s*(?:'([^']*)'|"([^"]*)"|(\S+))$"#).unwrap()
});

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(bool),
    Compare {
        name: String,
        negated: bool,
        value: String,
    },
    Truthy(String),
}

/// Default evaluator: boolean literals, `name == 'value'`, `name != 'value'`,
/// and bare variable truth.
#[derive(Debug)]
pub struct ComparisonEvaluator {
    source: String,
    expr: Expr,
}

impl ComparisonEvaluator {
    pub fn parse(expression: &str) -> ConfigResult<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyConditionExpression {
                config_path: String::new(),
            });
        }
        let expr = match trimmed {
            "true" => Expr::Literal(true),
            "false" => Expr::Literal(false),
            _ => match COMPARISON_REGEXP.captures(trimmed) {
                Some(cap) => {
                    let value = cap
                        .get(3)
                        .or_else(|| cap.get(4))
                        .or_else(|| cap.get(5))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    Expr::Compare {
                        name: cap[1].to_string(),
                        negated: &cap[2] == "!=",
                        value: value.to_string(),
                    }
                }
                None if trimmed.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '_') => {
                    Expr::Truthy(trimmed.to_string())
                }
                None => {
                    return Err(ConfigError::FactoryInstantiation {
                        class_name: DEFAULT_EVALUATOR_NAME.to_string(),
                        message: format!("unsupported expression '{}'", trimmed),
                        config_path: String::new(),
                    })
                }
            },
        };
        Ok(ComparisonEvaluator {
            source: trimmed.to_string(),
            expr,
        })
    }
}

impl ExpressionEvaluator for ComparisonEvaluator {
    fn evaluate(&self, context: &EvalContext) -> bool {
        match &self.expr {
            Expr::Literal(value) => *value,
            Expr::Compare {
                name,
                negated,
                value,
            } => {
                let equal = context.get(name) == Some(value.as_str());
                equal != *negated
            }
            Expr::Truthy(name) => matches!(context.get(name), Some(v) if !v.is_empty() && v != "false"),
        }
    }

    fn expression(&self) -> &str {
        &self.source
    }
}

/// Constructor signature registered with the factory.
pub type EvaluatorConstructor = fn(&str) -> ConfigResult<Arc<dyn ExpressionEvaluator>>;

/// Instantiates evaluators from `(class-name, expression)` pairs.
pub struct ExpressionEvaluatorFactory {
    constructors: HashMap<String, EvaluatorConstructor>,
}

impl ExpressionEvaluatorFactory {
    pub fn new() -> Self {
        let mut factory = ExpressionEvaluatorFactory {
            constructors: HashMap::new(),
        };
        factory.register(DEFAULT_EVALUATOR_NAME, |expr| {
            Ok(Arc::new(ComparisonEvaluator::parse(expr)?))
        });
        factory
    }

    pub fn register(&mut self, class_name: &str, constructor: EvaluatorConstructor) {
        self.constructors.insert(class_name.to_string(), constructor);
    }

    /// Create an evaluator. A missing class name selects the default.
    pub fn create(
        &self,
        class_name: Option<&str>,
        expression: &str,
    ) -> ConfigResult<Arc<dyn ExpressionEvaluator>> {
        if expression.trim().is_empty() {
            return Err(ConfigError::EmptyConditionExpression {
                config_path: String::new(),
            });
        }
        let name = class_name.unwrap_or(DEFAULT_EVALUATOR_NAME);
        let constructor =
            self.constructors
                .get(name)
                .ok_or_else(|| ConfigError::FactoryInstantiation {
                    class_name: name.to_string(),
                    message: "no evaluator registered under this name".to_string(),
                    config_path: String::new(),
                })?;
        constructor(expression)
    }
}

impl Default for ExpressionEvaluatorFactory {
    fn default() -> Self {
        Self::new()
    }
}
