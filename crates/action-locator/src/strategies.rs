//! Candidate strategies
//!
//! Each strategy turns a [`CandidateStrategy`] expression into a driver query:
//! 1. Structural - the expression is a CSS selector
//! 2. Text - visible text, promoted to the nearest clickable ancestor
//! 3. Attribute - `tag:name=value&name*=value&name` compiled to CSS

use async_trait::async_trait;
use cdp_adapter::{AdapterError, Cdp, NodeRef, QuerySpec};

use crate::{errors::LocatorError, types::*};

/// Strategy trait for candidate evaluation
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Compile the candidate expression into a driver query
    fn compile(&self, candidate: &CandidateStrategy) -> Result<QuerySpec, LocatorError>;

    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Snapshot of nodes currently matching the candidate, in document order
    async fn find(
        &self,
        page: &dyn Cdp,
        candidate: &CandidateStrategy,
    ) -> Result<Vec<NodeRef>, AdapterError> {
        match self.compile(candidate) {
            Ok(query) => page.query(&query).await,
            // Specs are validated before resolving.
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// CSS selector strategy
#[derive(Debug, Default)]
pub struct StructuralStrategy;

#[async_trait]
impl Strategy for StructuralStrategy {
    fn compile(&self, candidate: &CandidateStrategy) -> Result<QuerySpec, LocatorError> {
        let selector = candidate.expression.trim();
        if selector.is_empty() {
            return Err(LocatorError::invalid(
                candidate.describe(),
                "empty CSS selector",
            ));
        }
        Ok(QuerySpec::css(selector))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Structural
    }
}

/// Visible text strategy
#[derive(Debug)]
pub struct TextStrategy {
    promote_clickable: bool,
}

impl TextStrategy {
    pub fn new(promote_clickable: bool) -> Self {
        Self { promote_clickable }
    }
}

impl Default for TextStrategy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Strategy for TextStrategy {
    fn compile(&self, candidate: &CandidateStrategy) -> Result<QuerySpec, LocatorError> {
        let raw = candidate.expression.trim();
        let (text, exact) = match raw
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            Some(inner) => (inner, true),
            None => (raw, false),
        };
        if text.is_empty() {
            return Err(LocatorError::invalid(candidate.describe(), "empty text needle"));
        }
        Ok(QuerySpec::Text {
            text: text.to_string(),
            exact,
            promote_clickable: self.promote_clickable,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Text
    }
}

/// Attribute filter strategy
#[derive(Debug, Default)]
pub struct AttributeStrategy;

#[async_trait]
impl Strategy for AttributeStrategy {
    fn compile(&self, candidate: &CandidateStrategy) -> Result<QuerySpec, LocatorError> {
        Ok(QuerySpec::css(compile_attribute_filter(&candidate.expression)?))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Attribute
    }
}

const OPERATORS: [&str; 4] = ["*=", "^=", "$=", "="];

/// Compile `tag:name=value&name*=value&name` into a CSS selector.
pub fn compile_attribute_filter(filter: &str) -> Result<String, LocatorError> {
    let filter = filter.trim();
    let invalid = || LocatorError::InvalidFilter(filter.to_string());

    let (tag, clauses) = match filter.split_once(':') {
        Some((tag, rest)) if is_tag(tag) => (tag.trim(), rest),
        _ => ("", filter),
    };

    let mut selector = tag.to_string();
    let mut count = 0;
    for clause in clauses.split('&').map(str::trim).filter(|c| !c.is_empty()) {
        let parsed = OPERATORS
            .iter()
            .find_map(|op| clause.split_once(op).map(|(n, v)| (n.trim(), *op, v.trim())));
        match parsed {
            Some((name, op, value)) => {
                if !is_attr_name(name) {
                    return Err(invalid());
                }
                let value = value.trim_matches('"');
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                selector.push_str(&format!("[{}{}\"{}\"]", name, op, escaped));
            }
            None => {
                if !is_attr_name(clause) {
                    return Err(invalid());
                }
                selector.push_str(&format!("[{}]", clause));
            }
        }
        count += 1;
    }

    if count == 0 {
        return Err(invalid());
    }
    Ok(selector)
}

fn is_tag(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_filter_compiles_operators_and_presence() {
        assert_eq!(
            compile_attribute_filter("div:contenteditable=true&aria-label*=caption").unwrap(),
            r#"div[contenteditable="true"][aria-label*="caption"]"#
        );
        assert_eq!(
            compile_attribute_filter("data-lexical-editor").unwrap(),
            "[data-lexical-editor]"
        );
        assert_eq!(
            compile_attribute_filter("button:type^=but&class$=_asx2").unwrap(),
            r#"button[type^="but"][class$="_asx2"]"#
        );
    }

    #[test]
    fn attribute_filter_rejects_garbage() {
        assert!(compile_attribute_filter("").is_err());
        assert!(compile_attribute_filter("div:").is_err());
        assert!(compile_attribute_filter("div:na me=x").is_err());
    }

    #[test]
    fn text_strategy_detects_exact_quotes() {
        let strategy = TextStrategy::default();
        let partial = strategy.compile(&CandidateStrategy::text("Create")).unwrap();
        assert_eq!(
            partial,
            QuerySpec::Text {
                text: "Create".into(),
                exact: false,
                promote_clickable: true
            }
        );
        let exact = strategy
            .compile(&CandidateStrategy::text("\"Share\""))
            .unwrap();
        assert!(matches!(exact, QuerySpec::Text { exact: true, .. }));
    }

    #[test]
    fn structural_strategy_rejects_empty_selector() {
        assert!(StructuralStrategy.compile(&CandidateStrategy::css("  ")).is_err());
    }
}
