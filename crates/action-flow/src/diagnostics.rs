//! Structured diagnostic stream emitted by the state machine

use std::path::PathBuf;

use async_trait::async_trait;
use cdp_adapter::Cdp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ErrorKind, StepState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    StepStarted,
    StateEntered { state: StepState },
    StepAdvanced { skipped: bool },
    StepAborted { kind: ErrorKind },
    Verdict { verdict: String },
    RunFinished { status: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub run_id: String,
    pub step: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
    pub detail: Option<String>,
    pub artifacts: Vec<PathBuf>,
    pub at: DateTime<Utc>,
}

impl DiagnosticEvent {
    pub fn new(run_id: impl Into<String>, step: Option<&str>, kind: EventKind) -> Self {
        Self {
            run_id: run_id.into(),
            step: step.map(str::to_string),
            kind,
            detail: None,
            artifacts: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Side-channel consumer of diagnostics. Never part of control flow: failures
/// to capture are swallowed by implementations.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);

    /// Capture a screenshot (and the HTML when `html`) labelled `label`.
    async fn capture(&self, page: &dyn Cdp, label: &str, html: bool) -> Vec<PathBuf>;
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl DiagnosticSink for NullSink {
    fn record(&self, _event: DiagnosticEvent) {}

    async fn capture(&self, _page: &dyn Cdp, _label: &str, _html: bool) -> Vec<PathBuf> {
        Vec::new()
    }
}
