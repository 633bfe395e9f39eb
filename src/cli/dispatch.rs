use anyhow::Result;

use super::commands::Commands;
use super::context::CliContext;
use super::env::CliArgs;
use super::ledger::cmd_ledger;
use super::plan::cmd_plan;
use super::run::cmd_run;

/// Run the selected command; returns the process exit code.
pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<i32> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Ledger(args) => cmd_ledger(args, ctx).await,
        Commands::Plan(args) => cmd_plan(args, ctx).await,
    }
}
