use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::render_structured;
use crate::ledger::RunLedger;

#[derive(Args, Clone, Debug)]
pub struct LedgerArgs {}

#[derive(Debug, Serialize)]
struct LedgerView {
    path: String,
    day: u64,
    locked: bool,
}

pub async fn cmd_ledger(_args: LedgerArgs, ctx: &CliContext) -> Result<i32> {
    let ledger = RunLedger::new(&ctx.config().ledger_path);
    let view = LedgerView {
        path: ledger.path().display().to_string(),
        day: ledger.peek(),
        locked: ledger.lock_path().exists(),
    };
    match render_structured(&view, ctx.output())? {
        Some(text) => println!("{text}"),
        None => {
            println!("Ledger: {}", view.path);
            println!("Day:    {}", view.day);
            if view.locked {
                println!("Locked: a run is in progress (or left a stale lock)");
            }
        }
    }
    Ok(0)
}
