//! Run orchestrator
//!
//! Wires one ready session to the step machine and the completion verifier,
//! enforces the overall wall-clock budget, always closes the session, and
//! advances the ledger only on a confirmed success.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    CompletionSignals, CompletionVerifier, DefaultFlowExecutor, DiagnosticEvent, DiagnosticSink,
    ErrorKind, EventKind, Flow, FlowExecutor, FlowOutcome, NullSink, RunContext, StepResult,
    Verdict,
};
use action_primitives::FixedSettle;
use cdp_adapter::Cdp;
use chrono::{DateTime, Utc};
use postflow_core_types::RunId;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{error, info, warn};

use crate::diagnostics::{DiagnosticBus, FsDiagnosticSink};
use crate::ledger::LedgerLease;
use crate::session::SessionProvider;

/// Bound on the best-effort capture and close after a timeout.
const CLEANUP_BUDGET: Duration = Duration::from_secs(10);

/// Step reported when the budget runs out before a session exists.
pub const OPEN_SESSION_STEP: &str = "open-session";

pub const INTERRUPTED_STEP: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Ambiguous,
    Aborted,
}

impl RunStatus {
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Ambiguous => "ambiguous",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Single reported result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub step: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub reason: Option<String>,
    pub verdict: Option<Verdict>,
    pub ledger_before: u64,
    pub ledger_after: u64,
    pub steps: Vec<StepResult>,
    pub artifacts: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    fn new(run_id: &RunId, ledger: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Aborted,
            started_at: Utc::now(),
            step: None,
            error_kind: None,
            reason: None,
            verdict: None,
            ledger_before: ledger,
            ledger_after: ledger,
            steps: Vec::new(),
            artifacts: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn aborted(mut self, step: Option<String>, kind: ErrorKind, reason: impl Into<String>) -> Self {
        self.status = RunStatus::Aborted;
        self.step = step;
        self.error_kind = Some(kind);
        self.reason = Some(reason.into());
        self
    }

    /// Outcome for a run that never reached the session (media or caption
    /// preparation failed).
    pub fn preflight_failure(ledger: u64, step: &str, kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self::new(&RunId::new(), ledger).aborted(Some(step.to_string()), kind, reason)
    }

    /// Outcome for a run the operator stopped; the ledger is untouched.
    pub fn interrupted(ledger: u64) -> Self {
        Self::new(&RunId::new(), ledger).aborted(
            Some(INTERRUPTED_STEP.to_string()),
            ErrorKind::Interrupted,
            "interrupted by signal",
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// 0 only on confirmed success.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Aborted => 1,
            RunStatus::Failure => 2,
            RunStatus::Ambiguous => 3,
        }
    }
}

/// Inputs prepared by the caller before the run starts.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub media_path: PathBuf,
    pub caption: String,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub overall_timeout: Duration,
    pub verify_budget: Duration,
    pub verify_poll: Duration,
    pub step_poll: Duration,
    pub settle: FixedSettle,
    /// Where screenshots and HTML snapshots go; `None` disables capture
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(600),
            verify_budget: Duration::from_secs(30),
            verify_poll: Duration::from_secs(1),
            step_poll: Duration::from_millis(500),
            settle: FixedSettle::default(),
            diagnostics_dir: None,
        }
    }
}

enum Driven {
    Verdict(Verdict),
    Aborted {
        step: String,
        kind: ErrorKind,
        reason: String,
    },
}

pub struct Orchestrator {
    flow: Flow,
    signals: CompletionSignals,
    settings: RunSettings,
    bus: Option<Arc<DiagnosticBus>>,
}

impl Orchestrator {
    pub fn new(flow: Flow, signals: CompletionSignals, settings: RunSettings) -> Self {
        Self {
            flow,
            signals,
            settings,
            bus: None,
        }
    }

    /// Publish diagnostic events on `bus`.
    pub fn with_bus(mut self, bus: Arc<DiagnosticBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    fn sink_for(&self, run_id: &RunId) -> Arc<dyn DiagnosticSink> {
        match (&self.settings.diagnostics_dir, &self.bus) {
            (Some(dir), Some(bus)) => Arc::new(FsDiagnosticSink::with_bus(dir, run_id.short(), bus.clone())),
            (Some(dir), None) => Arc::new(FsDiagnosticSink::new(dir, run_id.short())),
            (None, _) => Arc::new(NullSink),
        }
    }

    /// Run the flow once against a session from `sessions`.
    pub async fn execute(
        &self,
        lease: &LedgerLease,
        sessions: &dyn SessionProvider,
        inputs: RunInputs,
    ) -> RunOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.overall_timeout;
        let run_id = RunId::new();
        let before = lease.read();
        let mut outcome = RunOutcome::new(&run_id, before);
        info!(run_id = %run_id, day = before, "run started");

        let page = match timeout_at(deadline, sessions.open()).await {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => {
                error!(run_id = %run_id, %err, "session unavailable");
                let mut outcome = outcome.aborted(None, err.kind(), err.to_string());
                outcome.elapsed_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
            Err(_) => {
                warn!(run_id = %run_id, "overall timeout exceeded while opening the session");
                let mut outcome = outcome.aborted(
                    Some(OPEN_SESSION_STEP.to_string()),
                    ErrorKind::OverallTimeoutExceeded,
                    self.timeout_reason(),
                );
                outcome.elapsed_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };
        let sink = self.sink_for(&run_id);
        let mut ctx = RunContext::new(run_id.to_string(), inputs.media_path, inputs.caption);

        let driven = timeout_at(deadline, self.drive(page.clone(), sink.clone(), &mut ctx)).await;

        outcome = match driven {
            Ok(Driven::Verdict(verdict)) => self.settle_verdict(outcome, verdict, lease),
            Ok(Driven::Aborted { step, kind, reason }) => outcome.aborted(Some(step), kind, reason),
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    step = ?ctx.current_step,
                    budget_ms = self.settings.overall_timeout.as_millis() as u64,
                    "overall timeout exceeded"
                );
                let label = format!("{}-overall-timeout", ctx.current_step.as_deref().unwrap_or("run"));
                if let Ok(paths) = timeout(CLEANUP_BUDGET, sink.capture(page.as_ref(), &label, true)).await {
                    ctx.artifacts.extend(paths);
                }
                outcome.aborted(
                    ctx.current_step.clone(),
                    ErrorKind::OverallTimeoutExceeded,
                    self.timeout_reason(),
                )
            }
        };

        match timeout(CLEANUP_BUDGET, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(run_id = %run_id, %err, "session close failed"),
            Err(_) => warn!(run_id = %run_id, "session close timed out"),
        }

        outcome.steps = ctx.history;
        outcome.artifacts = ctx.artifacts;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        sink.record(
            DiagnosticEvent::new(
                &outcome.run_id,
                outcome.step.as_deref(),
                EventKind::RunFinished {
                    status: outcome.status.name().to_string(),
                },
            )
            .with_artifacts(outcome.artifacts.clone()),
        );
        info!(
            run_id = %outcome.run_id,
            status = outcome.status.name(),
            ledger_before = outcome.ledger_before,
            ledger_after = outcome.ledger_after,
            elapsed_ms = outcome.elapsed_ms,
            "run finished"
        );
        outcome
    }

    fn timeout_reason(&self) -> String {
        format!(
            "overall timeout of {} exceeded",
            humantime::format_duration(self.settings.overall_timeout)
        )
    }

    async fn drive(
        &self,
        page: Arc<dyn Cdp>,
        sink: Arc<dyn DiagnosticSink>,
        ctx: &mut RunContext,
    ) -> Driven {
        let executor = DefaultFlowExecutor::for_page(page.clone(), self.settings.settle.clone())
            .with_sink(sink.clone())
            .with_poll_interval(self.settings.step_poll);

        let result = match executor.execute(&self.flow, ctx).await {
            Ok(result) => result,
            Err(err) => {
                return Driven::Aborted {
                    step: self.flow.id.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                }
            }
        };
        if let FlowOutcome::Aborted { step, kind, reason } = result.outcome {
            return Driven::Aborted { step, kind, reason };
        }

        ctx.current_step = Some("verify-completion".to_string());
        let verifier = CompletionVerifier::new(page.clone(), executor.resolver(), self.signals.clone())
            .with_poll_interval(self.settings.verify_poll);
        let verdict = verifier.verify(self.settings.verify_budget).await;
        let label = format!("{:02}-verify-completion", self.flow.steps.len() + 1);
        let artifacts = sink.capture(page.as_ref(), &label, !verdict.is_success()).await;
        ctx.artifacts.extend(artifacts.iter().cloned());
        sink.record(
            DiagnosticEvent::new(
                &ctx.run_id,
                Some("verify-completion"),
                EventKind::Verdict {
                    verdict: verdict.name().to_string(),
                },
            )
            .with_artifacts(artifacts),
        );
        Driven::Verdict(verdict)
    }

    fn settle_verdict(&self, mut outcome: RunOutcome, verdict: Verdict, lease: &LedgerLease) -> RunOutcome {
        let step = Some("verify-completion".to_string());
        match &verdict {
            Verdict::Success { .. } => {
                let next = outcome.ledger_before + 1;
                match lease.commit(next) {
                    Ok(()) => {
                        outcome.status = RunStatus::Success;
                        outcome.ledger_after = next;
                    }
                    Err(err) => {
                        error!(%err, "post confirmed but ledger commit failed");
                        outcome = outcome.aborted(
                            Some("ledger-commit".to_string()),
                            ErrorKind::ExternalResourceError,
                            err.to_string(),
                        );
                    }
                }
            }
            Verdict::Failure { signal } => {
                outcome.status = RunStatus::Failure;
                outcome.step = step;
                outcome.error_kind = Some(ErrorKind::CompletionFailed);
                outcome.reason = Some(format!("negative signal {signal}"));
            }
            Verdict::Ambiguous { weak_hint } => {
                outcome.status = RunStatus::Ambiguous;
                outcome.step = step;
                outcome.error_kind = Some(ErrorKind::Ambiguous);
                outcome.reason = Some(match weak_hint {
                    Some(hint) => format!("no confirmation signal (weak hint '{hint}')"),
                    None => "no confirmation signal".to_string(),
                });
            }
        }
        outcome.verdict = Some(verdict);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_status() {
        let id = RunId::new();
        let mut outcome = RunOutcome::new(&id, 5);
        assert_eq!(outcome.exit_code(), 1);
        outcome.status = RunStatus::Success;
        assert_eq!(outcome.exit_code(), 0);
        outcome.status = RunStatus::Failure;
        assert_eq!(outcome.exit_code(), 2);
        outcome.status = RunStatus::Ambiguous;
        assert_eq!(outcome.exit_code(), 3);
    }
}
