use anyhow::{Context, Result};
use action_flow::{DefaultFlowExecutor, FlowExecutor, NotFoundPolicy};
use cdp_adapter::MemoryPage;
use clap::Args;
use std::sync::Arc;

use super::context::CliContext;
use super::output::render_structured;
use crate::workflow::publish_flow;

#[derive(Args, Clone, Debug)]
pub struct PlanArgs {
    /// Also list every locator candidate
    #[arg(long)]
    pub candidates: bool,
}

pub async fn cmd_plan(args: PlanArgs, ctx: &CliContext) -> Result<i32> {
    let flow = publish_flow(ctx.config());
    // Validation needs no live page.
    let executor = DefaultFlowExecutor::for_page(Arc::new(MemoryPage::new("about:blank")), Default::default());
    executor
        .validate_flow(&flow)
        .context("Publishing flow is invalid")?;

    if let Some(text) = render_structured(&flow, ctx.output())? {
        println!("{text}");
        return Ok(0);
    }

    println!("{} ({})", flow.name, flow.id);
    for (index, step) in flow.steps.iter().enumerate() {
        let mut flags = Vec::new();
        if !step.required {
            flags.push("optional".to_string());
        }
        if step.mutates_dom {
            flags.push("rebinds".to_string());
        }
        if step.repeat > 1 {
            flags.push(format!("x{}", step.repeat));
        }
        if let NotFoundPolicy::Fallback(fallback) = &step.on_not_found {
            flags.push(format!("fallback {:?}", fallback));
        }
        println!(
            "{:>2}. {:<16} {:<14} timeout {:<6} {}",
            index + 1,
            step.name,
            step.action.name(),
            humantime::format_duration(step.timeout()).to_string(),
            flags.join(", ")
        );
        if args.candidates {
            for candidate in &step.locator.candidates {
                println!("      - {}", candidate.describe());
            }
        }
    }
    Ok(0)
}
