use std::fmt::Write as _;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use crate::orchestrator::RunOutcome;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

/// Serialize `value` for the machine formats; `None` for human output.
pub fn render_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    Ok(match format {
        OutputFormat::Human => None,
        OutputFormat::Json => Some(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value)?),
    })
}

pub fn render_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<String> {
    if let Some(text) = render_structured(outcome, format)? {
        return Ok(text);
    }

    let mut out = String::new();
    writeln!(out, "Run {}: {}", outcome.run_id, outcome.status.name().to_uppercase())?;
    writeln!(out, "Started: {}", outcome.started_at.to_rfc3339())?;
    writeln!(
        out,
        "Day counter: {} -> {}",
        outcome.ledger_before, outcome.ledger_after
    )?;
    if let Some(kind) = &outcome.error_kind {
        writeln!(
            out,
            "Failed step: {} ({})",
            outcome.step.as_deref().unwrap_or("-"),
            kind
        )?;
    }
    if let Some(reason) = &outcome.reason {
        writeln!(out, "Reason: {}", reason)?;
    }
    if !outcome.steps.is_empty() {
        writeln!(out, "Steps:")?;
        for step in &outcome.steps {
            let status = if step.skipped {
                "skipped"
            } else if step.success {
                "ok"
            } else {
                "failed"
            };
            writeln!(
                out,
                "  {:<22} {:<8} {:>7} ms  retries={}{}",
                step.step_id,
                status,
                step.latency_ms,
                step.retry_attempts,
                if step.fallback_used { " fallback" } else { "" }
            )?;
        }
    }
    if !outcome.artifacts.is_empty() {
        writeln!(out, "Diagnostics:")?;
        for path in &outcome.artifacts {
            writeln!(out, "  {}", path.display())?;
        }
    }
    write!(
        out,
        "Elapsed: {}",
        humantime::format_duration(std::time::Duration::from_millis(outcome.elapsed_ms))
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RunStatus;

    fn outcome() -> RunOutcome {
        serde_json::from_value(serde_json::json!({
            "run_id": "abc",
            "status": "aborted",
            "started_at": "2026-01-05T09:30:00Z",
            "step": "share",
            "error_kind": "ElementNotFound",
            "reason": "no candidate matched",
            "verdict": null,
            "ledger_before": 5,
            "ledger_after": 5,
            "steps": [],
            "artifacts": ["diagnostics/abc-06-share-aborted.png"],
            "elapsed_ms": 1500
        }))
        .unwrap()
    }

    #[test]
    fn human_output_names_step_kind_and_artifacts() {
        let text = render_outcome(&outcome(), OutputFormat::Human).unwrap();
        assert!(text.contains("Failed step: share (ElementNotFound)"));
        assert!(text.contains("abc-06-share-aborted.png"));
        assert!(text.contains("5 -> 5"));
    }

    #[test]
    fn json_output_round_trips_status() {
        let text = render_outcome(&outcome(), OutputFormat::Json).unwrap();
        let back: RunOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(back.status, RunStatus::Aborted);
    }
}
