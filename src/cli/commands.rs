use clap::Subcommand;

use super::ledger::LedgerArgs;
use super::plan::PlanArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Publish one post and advance the day counter on confirmed success
    Run(RunArgs),

    /// Show the day counter
    Ledger(LedgerArgs),

    /// Print the validated step sequence
    Plan(PlanArgs),
}
