//! Selector-path compiler
//!
//! Turns a selector string into an ordered sequence of steps. The namespace
//! prefix table is consulted here, once, so compiled paths carry resolved
//! namespace URIs and later matching needs no prefix state.

use super::{ElementStep, NameTest, Predicate, SelectorPath, SelectorStep};
use crate::error::{ConfigError, ConfigResult};
use crate::expression::ExpressionEvaluatorFactory;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

static POSITION_REGEXP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*$").unwrap());

static ATTR_EQUALS_REGEXP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*@?([\w.-]+(?::[\w.-]+)?)\s*=\s*(?:'([^']*)'|"([^"]*)"|([^\s\]]+))\s*$"#)
        .unwrap()
});

static NAME_REGEXP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][\w.-]*(?::[A-Za-z_][\w.-]*)?$").unwrap());

/// Compiles selector strings into [`SelectorPath`]s.
pub struct SelectorPathParser {
    evaluators: Arc<ExpressionEvaluatorFactory>,
}

impl SelectorPathParser {
    pub fn new() -> Self {
        SelectorPathParser {
            evaluators: Arc::new(ExpressionEvaluatorFactory::new()),
        }
    }

    /// Use a shared evaluator factory for arbitrary-expression predicates.
    pub fn with_evaluators(evaluators: Arc<ExpressionEvaluatorFactory>) -> Self {
        SelectorPathParser { evaluators }
    }

    pub fn parse(
        &self,
        selector: &str,
        namespaces: &HashMap<String, String>,
    ) -> ConfigResult<SelectorPath> {
        let source = selector.trim();
        if source.is_empty() {
            return Err(self.syntax_error(selector, "selector is empty"));
        }

        let mut steps: Vec<SelectorStep> = Vec::new();
        let mut rest = source;
        if let Some(stripped) = rest.strip_prefix('/') {
            steps.push(SelectorStep::Document);
            rest = stripped;
        }

        for raw_step in split_steps(rest) {
            let raw_step = raw_step.trim();
            if raw_step.is_empty() {
                return Err(self.syntax_error(source, "empty step"));
            }
            if matches!(
                steps.last(),
                Some(SelectorStep::Text) | Some(SelectorStep::Attribute { .. })
            ) {
                return Err(self.syntax_error(
                    source,
                    "text() and attribute steps must be the final step",
                ));
            }
            self.parse_step(source, raw_step, namespaces, &mut steps)?;
        }

        if steps.is_empty() {
            return Err(self.syntax_error(source, "selector has no steps"));
        }

        Ok(SelectorPath::from_parts(
            steps,
            namespaces.clone(),
            source.to_string(),
        ))
    }

    fn parse_step(
        &self,
        source: &str,
        raw_step: &str,
        namespaces: &HashMap<String, String>,
        steps: &mut Vec<SelectorStep>,
    ) -> ConfigResult<()> {
        let (name_part, predicate_bodies) = split_predicates(raw_step)
            .map_err(|msg| self.syntax_error(source, msg))?;
        let name_part = name_part.trim();

        if name_part == "text()" {
            if !predicate_bodies.is_empty() {
                return Err(self.syntax_error(source, "text() does not take predicates"));
            }
            match last_element_mut(steps) {
                Some(element) => element.accesses_text = true,
                None => {
                    return Err(self.syntax_error(source, "text() requires a containing element"))
                }
            }
            steps.push(SelectorStep::Text);
            return Ok(());
        }

        if let Some(attr_name) = name_part.strip_prefix('@') {
            if !predicate_bodies.is_empty() {
                return Err(self.syntax_error(source, "attribute steps do not take predicates"));
            }
            let (prefix, local) = split_qname(attr_name);
            if !NAME_REGEXP.is_match(attr_name) {
                return Err(self.syntax_error(source, format!("invalid attribute name '{}'", attr_name)));
            }
            steps.push(SelectorStep::Attribute { prefix, local });
            return Ok(());
        }

        let name = if name_part == "*" {
            NameTest::Any
        } else {
            if !NAME_REGEXP.is_match(name_part) {
                return Err(self.syntax_error(source, format!("invalid name test '{}'", name_part)));
            }
            let (prefix, local) = split_qname(name_part);
            let namespace = match &prefix {
                Some(p) => Some(namespaces.get(p).cloned().ok_or_else(|| {
                    self.syntax_error(source, format!("unknown namespace prefix '{}'", p))
                })?),
                None => None,
            };
            NameTest::Name {
                prefix,
                namespace,
                local,
            }
        };

        let mut predicates = Vec::new();
        for body in predicate_bodies {
            predicates.push(self.parse_predicate(source, &body)?);
        }

        steps.push(SelectorStep::Element(ElementStep {
            name,
            predicates,
            accesses_text: false,
        }));
        Ok(())
    }

    fn parse_predicate(&self, source: &str, body: &str) -> ConfigResult<Predicate> {
        if let Some(cap) = POSITION_REGEXP.captures(body) {
            let position: usize = cap[1]
                .parse()
                .map_err(|_| self.syntax_error(source, format!("invalid position '{}'", body)))?;
            if position == 0 {
                return Err(self.syntax_error(source, "positions are 1-based"));
            }
            return Ok(Predicate::Position {
                position,
                counter: None,
            });
        }
        if let Some(cap) = ATTR_EQUALS_REGEXP.captures(body) {
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            return Ok(Predicate::AttributeEquals {
                name: cap[1].to_string(),
                value: value.to_string(),
            });
        }
        let evaluator = self.evaluators.create(None, body)?;
        Ok(Predicate::Expression(evaluator))
    }

    fn syntax_error(&self, selector: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidSelectorSyntax {
            selector: selector.to_string(),
            message: message.into(),
            config_path: String::new(),
        }
    }
}

impl Default for SelectorPathParser {
    fn default() -> Self {
        Self::new()
    }
}

fn last_element_mut(steps: &mut [SelectorStep]) -> Option<&mut ElementStep> {
    steps.iter_mut().rev().find_map(|s| match s {
        SelectorStep::Element(e) => Some(e),
        _ => None,
    })
}

fn split_qname(raw: &str) -> (Option<String>, String) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, raw.to_string()),
    }
}

/// Split a selector body on `/`, ignoring separators inside predicates and
/// quoted literals.
fn split_steps(selector: &str) -> Vec<String> {
    let mut steps = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in selector.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                '/' if depth == 0 => {
                    steps.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.is_empty() || !steps.is_empty() && selector.ends_with('/') {
        steps.push(current);
    }
    steps
}

/// Split one raw step into its name part and predicate bodies.
fn split_predicates(raw_step: &str) -> Result<(String, Vec<String>), String> {
    let mut name = String::new();
    let mut predicates = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in raw_step.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' if depth > 0 => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' => {
                    if depth == 0 {
                        current.clear();
                    } else {
                        current.push(ch);
                    }
                    depth += 1;
                }
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| format!("unbalanced ']' in step '{}'", raw_step))?;
                    if depth == 0 {
                        predicates.push(std::mem::take(&mut current));
                    } else {
                        current.push(ch);
                    }
                }
                _ => {
                    if depth == 0 {
                        name.push(ch);
                    } else {
                        current.push(ch);
                    }
                }
            },
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced '[' in step '{}'", raw_step));
    }
    Ok((name, predicates))
}
