use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, LogOptions};
use crate::config::load_config;

/// Parse arguments, set up logging and run the command. Returns the exit code.
pub async fn run() -> Result<i32> {
    let cli = CliArgs::parse();

    let loaded = load_config(cli.config.as_deref()).await?;
    let config = loaded.config.clone();
    let _log_guard = init_logging(&LogOptions {
        level: cli.log_level.clone(),
        debug: cli.debug,
        json: config.json_logs,
        dir: Some(config.diagnostics_dir.clone()),
    })?;

    info!("Starting postflow v{}", env!("CARGO_PKG_VERSION"));
    loaded.log();
    debug!(?config, "effective configuration");
    let ctx = CliContext::new(config, cli.config.clone(), cli.output);

    match dispatch(&cli, &ctx).await {
        Ok(code) => {
            info!(exit_code = code, "command finished");
            Ok(code)
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
