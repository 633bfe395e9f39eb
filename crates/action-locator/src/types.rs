//! Core types for the locator

use std::time::Duration;

use cdp_adapter::{NodeRef, NodeState};
use serde::{Deserialize, Serialize};

/// How a candidate identifies its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Structural CSS selector
    Structural,

    /// Visible text content
    Text,

    /// `tag:name=value&...` attribute filter
    Attribute,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Structural => "structural",
            StrategyKind::Text => "text",
            StrategyKind::Attribute => "attribute",
        }
    }
}

/// One way of identifying a target element. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateStrategy {
    pub kind: StrategyKind,
    pub expression: String,
    /// Live text the matched node must contain before it is accepted.
    pub required_substring: Option<String>,
    /// Overrides the spec-wide per-candidate budget.
    pub wait_budget: Option<Duration>,
}

impl CandidateStrategy {
    fn new(kind: StrategyKind, expression: impl Into<String>) -> Self {
        Self {
            kind,
            expression: expression.into(),
            required_substring: None,
            wait_budget: None,
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(StrategyKind::Structural, selector)
    }

    /// Partial text match; wrap the needle in double quotes for an exact match.
    pub fn text(needle: impl Into<String>) -> Self {
        Self::new(StrategyKind::Text, needle)
    }

    pub fn attribute(filter: impl Into<String>) -> Self {
        Self::new(StrategyKind::Attribute, filter)
    }

    pub fn requiring(mut self, substring: impl Into<String>) -> Self {
        self.required_substring = Some(substring.into());
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = Some(budget);
        self
    }

    pub fn describe(&self) -> String {
        match &self.required_substring {
            Some(sub) => format!("{}:{} ~'{}'", self.kind.name(), self.expression, sub),
            None => format!("{}:{}", self.kind.name(), self.expression),
        }
    }
}

/// Declarative, reusable description of how to find one control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorSpec {
    pub name: String,
    pub candidates: Vec<CandidateStrategy>,
    pub candidate_budget: Duration,
    pub step_timeout: Duration,
    pub poll_interval: Duration,
    pub require_visible: bool,
}

impl LocatorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            candidate_budget: Duration::from_secs(5),
            step_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            require_visible: true,
        }
    }

    pub fn candidate(mut self, candidate: CandidateStrategy) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn candidate_budget(mut self, budget: Duration) -> Self {
        self.candidate_budget = budget;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Accept nodes that are attached but not rendered (hidden file inputs).
    pub fn allow_hidden(mut self) -> Self {
        self.require_visible = false;
        self
    }

    /// Same spec with `candidate` tried before every declared candidate.
    pub fn with_leading(&self, candidate: CandidateStrategy) -> Self {
        let mut spec = self.clone();
        spec.candidates.insert(0, candidate);
        spec
    }

    pub fn budget_for(&self, candidate: &CandidateStrategy) -> Duration {
        candidate.wait_budget.unwrap_or(self.candidate_budget)
    }

    /// Upper bound on the wall-clock cost of one resolve.
    pub fn worst_case(&self) -> Duration {
        let sum: Duration = self.candidates.iter().map(|c| self.budget_for(c)).sum();
        sum.min(self.step_timeout)
    }
}

/// Reference to a live node, tagged with what was observed when it was resolved.
///
/// Deliberately not `Clone`: a handle is consumed by the binder when the node
/// it points at is replaced.
#[derive(Debug, PartialEq, Eq)]
pub struct ElementHandle {
    node: NodeRef,
    tag: String,
    visible: bool,
    interactable: bool,
    marker: Option<String>,
    strategy: StrategyKind,
    candidate_index: usize,
}

impl ElementHandle {
    pub fn from_state(
        node: NodeRef,
        state: &NodeState,
        strategy: StrategyKind,
        candidate_index: usize,
    ) -> Self {
        Self {
            node,
            tag: state.tag.clone(),
            visible: state.visible,
            interactable: state.is_interactable(),
            marker: state.marker.clone(),
            strategy,
            candidate_index,
        }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_interactable(&self) -> bool {
        self.interactable
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn candidate_index(&self) -> usize {
        self.candidate_index
    }
}

/// What happened when one candidate was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    TimedOut,
    TextMismatch { observed: String },
    NotInteractable,
    Error { reason: String },
    /// The step timeout was already spent before this candidate's turn.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAttempt {
    pub index: usize,
    pub kind: StrategyKind,
    pub expression: String,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Result of one resolve call.
#[derive(Debug)]
pub enum Resolution {
    Found {
        handle: ElementHandle,
        attempts: Vec<CandidateAttempt>,
    },
    NotFound {
        attempts: Vec<CandidateAttempt>,
    },
}

impl Resolution {
    pub fn attempts(&self) -> &[CandidateAttempt] {
        match self {
            Resolution::Found { attempts, .. } | Resolution::NotFound { attempts } => attempts,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found { .. })
    }

    pub fn into_handle(self) -> Option<ElementHandle> {
        match self {
            Resolution::Found { handle, .. } => Some(handle),
            Resolution::NotFound { .. } => None,
        }
    }
}
