//! Core types for the step state machine

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use action_locator::{CandidateAttempt, CandidateStrategy, LocatorSpec};
use action_primitives::{Action, ActionReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Ordered, static sequence of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// What a step does once its element is located
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Load `url`; such steps have no element to locate
    Navigate { url: String },
    Click,
    /// Type the run's caption
    EnterCaption,
    /// Attach the run's media file
    AttachMedia,
    PressKey { key: String },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Click => "click",
            StepAction::EnterCaption => "enter_caption",
            StepAction::AttachMedia => "attach_media",
            StepAction::PressKey { .. } => "press_key",
        }
    }

    pub fn needs_element(&self) -> bool {
        !matches!(self, StepAction::Navigate { .. })
    }

    /// Bind to the run inputs. `None` for navigation.
    pub fn bind(&self, ctx: &RunContext) -> Option<Action> {
        match self {
            StepAction::Navigate { .. } => None,
            StepAction::Click => Some(Action::Click),
            StepAction::EnterCaption => Some(Action::SetText {
                text: ctx.caption.clone(),
            }),
            StepAction::AttachMedia => Some(Action::AttachFile {
                path: ctx.media_path.clone(),
            }),
            StepAction::PressKey { key } => Some(Action::PressKey { key: key.clone() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackAction {
    /// Go straight to a known deep link
    Navigate { url: String },
    /// Keyboard alternative
    PressKey { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotFoundPolicy {
    Abort,
    Fallback(FallbackAction),
}

/// Predicate polled after a step acts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostCondition {
    Visible(CandidateStrategy),
    Hidden(CandidateStrategy),
    UrlContains(String),
    PageTextContains(String),
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostCondition::Visible(c) => write!(f, "visible({})", c.describe()),
            PostCondition::Hidden(c) => write!(f, "hidden({})", c.describe()),
            PostCondition::UrlContains(s) => write!(f, "url~'{}'", s),
            PostCondition::PageTextContains(s) => write!(f, "text~'{}'", s),
        }
    }
}

/// One named step of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub locator: LocatorSpec,
    pub action: StepAction,
    /// Route through the mutation-safe binder before acting
    pub mutates_dom: bool,
    pub post_condition: Option<PostCondition>,
    pub on_not_found: NotFoundPolicy,
    pub required: bool,
    pub retry_budget: u32,
    /// Run up to this many instances (`name#1..name#n`) until one is skipped
    pub repeat: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, locator: LocatorSpec, action: StepAction) -> Self {
        Self {
            name: name.into(),
            locator,
            action,
            mutates_dom: false,
            post_condition: None,
            on_not_found: NotFoundPolicy::Abort,
            required: true,
            retry_budget: 1,
            repeat: 1,
        }
    }

    /// Navigation step; `deadline` bounds the page load
    pub fn navigate(name: impl Into<String>, url: impl Into<String>, deadline: Duration) -> Self {
        let name = name.into();
        let locator = LocatorSpec::new(name.clone()).step_timeout(deadline);
        Self::new(name, locator, StepAction::Navigate { url: url.into() })
    }

    pub fn mutating(mut self) -> Self {
        self.mutates_dom = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn expect(mut self, condition: PostCondition) -> Self {
        self.post_condition = Some(condition);
        self
    }

    pub fn on_not_found(mut self, fallback: FallbackAction) -> Self {
        self.on_not_found = NotFoundPolicy::Fallback(fallback);
        self
    }

    pub fn retries(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn repeat(mut self, times: u32) -> Self {
        self.repeat = times.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.locator.step_timeout
    }
}

/// States a step moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    Pending,
    Locating,
    Acting,
    Verifying,
    Advanced,
    Retrying,
    FallbackNavigating,
    Aborted,
}

/// Error taxonomy shared by the flow and the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ElementNotFound,
    StaleElementReference,
    ActionFailed,
    VerificationTimeout,
    Ambiguous,
    CompletionFailed,
    ExternalResourceError,
    OverallTimeoutExceeded,
    /// The operator stopped the run
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ElementNotFound => "ElementNotFound",
            ErrorKind::StaleElementReference => "StaleElementReference",
            ErrorKind::ActionFailed => "ActionFailed",
            ErrorKind::VerificationTimeout => "VerificationTimeout",
            ErrorKind::Ambiguous => "Ambiguous",
            ErrorKind::CompletionFailed => "CompletionFailed",
            ErrorKind::ExternalResourceError => "ExternalResourceError",
            ErrorKind::OverallTimeoutExceeded => "OverallTimeoutExceeded",
            ErrorKind::Interrupted => "Interrupted",
        };
        f.write_str(name)
    }
}

/// Mutable per-run state. Created at orchestration start, dropped at run end.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub media_path: PathBuf,
    pub caption: String,
    /// Index into the flow of the step currently executing
    pub step_index: usize,
    /// Name of the step instance currently executing
    pub current_step: Option<String>,
    pub started: Instant,
    pub artifacts: Vec<PathBuf>,
    pub notes: Vec<String>,
    /// Every finished step instance, kept even if the run is cut short
    pub history: Vec<StepResult>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, media_path: PathBuf, caption: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            media_path,
            caption: caption.into(),
            step_index: 0,
            current_step: None,
            started: Instant::now(),
            artifacts: Vec::new(),
            notes: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// How a flow ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowOutcome {
    Completed,
    Aborted {
        step: String,
        kind: ErrorKind,
        reason: String,
    },
}

/// Flow execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub flow_id: String,
    pub outcome: FlowOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub step_results: Vec<StepResult>,
}

impl FlowResult {
    pub fn new(flow_id: String) -> Self {
        let now = Utc::now();
        Self {
            flow_id,
            outcome: FlowOutcome::Completed,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            step_results: Vec::new(),
        }
    }

    pub fn with_step(mut self, result: StepResult) -> Self {
        self.step_results.push(result);
        self
    }

    pub fn aborted(mut self, step: String, kind: ErrorKind, reason: String) -> Self {
        self.outcome = FlowOutcome::Aborted { step, kind, reason };
        self
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == FlowOutcome::Completed
    }

    /// Set finish time and calculate latency
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self
    }
}

/// Per-step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_type: String,
    pub success: bool,
    /// Optional step not found and passed over
    pub skipped: bool,
    pub transitions: Vec<StepState>,
    /// Candidate attempts of the most recent resolve
    pub attempts: Vec<CandidateAttempt>,
    pub action_report: Option<ActionReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub retry_attempts: u32,
    pub fallback_used: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub artifacts: Vec<PathBuf>,
}

impl StepResult {
    pub fn new(step_id: String, step_type: String) -> Self {
        let now = Utc::now();
        Self {
            step_id,
            step_type,
            success: false,
            skipped: false,
            transitions: vec![StepState::Pending],
            attempts: Vec::new(),
            action_report: None,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            retry_attempts: 0,
            fallback_used: false,
            error: None,
            error_kind: None,
            artifacts: Vec::new(),
        }
    }

    pub fn enter(&mut self, state: StepState) {
        self.transitions.push(state);
    }

    pub fn state(&self) -> StepState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(StepState::Pending)
    }

    /// Mark as success
    pub fn with_success(mut self) -> Self {
        self.success = true;
        self
    }

    pub fn with_skip(mut self) -> Self {
        self.success = true;
        self.skipped = true;
        self
    }

    /// Mark as failure
    pub fn with_error(mut self, kind: ErrorKind, error: String) -> Self {
        self.success = false;
        self.error_kind = Some(kind);
        self.error = Some(error);
        self
    }

    /// Set finish time and calculate latency
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self
    }
}
