use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "run.log";

pub struct LogOptions {
    pub level: String,
    pub debug: bool,
    /// JSON lines on stderr instead of the human format
    pub json: bool,
    /// Also write `run.log` here
    pub dir: Option<PathBuf>,
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// the file writer flushes.
pub fn init_logging(opts: &LogOptions) -> Result<Option<WorkerGuard>> {
    let level = if opts.debug {
        tracing::Level::DEBUG
    } else {
        opts.level.parse().context("Invalid log level")?
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let (file_layer, guard) = match &opts.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let human = (!opts.json).then(|| fmt::layer().with_writer(std::io::stderr));
    let json = opts
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(json)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
