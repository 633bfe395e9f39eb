use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use action_primitives::FixedSettle;
use anyhow::{Context, Result};
use cdp_adapter::CdpConfig;
use clap::Args;
use postflow_event_bus::InMemoryBus;
use tokio::signal;
use tracing::{info, warn};

use super::context::CliContext;
use super::output::render_outcome;
use crate::caption::{caption_for, TagSource, TrendFeedTags};
use crate::config::Config;
use crate::diagnostics::spawn_event_log;
use crate::ledger::{LedgerLease, RunLedger};
use crate::media::{LinkListMedia, LocalMedia, MediaSource};
use crate::orchestrator::{Orchestrator, RunInputs, RunOutcome, RunSettings};
use crate::session::ChromiumSessions;
use crate::workflow::{completion_signals, publish_flow};

pub const EVENT_LOG: &str = "events.jsonl";

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Upload this local file instead of downloading one from the links file
    #[arg(long, value_name = "PATH")]
    pub media: Option<PathBuf>,

    /// Use this caption instead of generating one
    #[arg(long, value_name = "TEXT")]
    pub caption: Option<String>,

    /// Show the browser window
    #[arg(long, conflicts_with = "headless")]
    pub headed: bool,

    /// Hide the browser window
    #[arg(long)]
    pub headless: bool,

    /// Overall wall-clock budget for the run
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Keep downloaded media after the run
    #[arg(long)]
    pub keep_media: bool,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<i32> {
    let mut config = ctx.config().clone();
    if args.headed && !config.request_headed() {
        warn!("--headed ignored: CI runners have no display");
    }
    if args.headless {
        config.headless = true;
    }
    if let Some(secs) = args.timeout_secs {
        config.overall_timeout_secs = secs;
    }
    config.keep_media |= args.keep_media;

    let ledger = RunLedger::new(&config.ledger_path);
    let lease = ledger
        .acquire()
        .context("Another run holds the day counter")?;
    let day = lease.read();
    info!(day, ledger = %ledger.path().display(), "day counter read");

    let outcome = match unless_interrupted(publish(&config, &args, &lease, day), ctrl_c()).await {
        Some(outcome) => outcome?,
        None => {
            warn!("run interrupted, releasing the day counter");
            RunOutcome::interrupted(day)
        }
    };
    drop(lease);

    println!("{}", render_outcome(&outcome, ctx.output())?);
    Ok(outcome.exit_code())
}

/// `None` when `interrupt` resolves first; `work` is dropped unfinished.
pub async fn unless_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        out = work => Some(out),
        _ = interrupt => None,
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn publish(config: &Config, args: &RunArgs, lease: &LedgerLease, day: u64) -> Result<RunOutcome> {
    let source: Box<dyn MediaSource> = match &args.media {
        Some(path) => Box::new(LocalMedia::new(path)),
        None => Box::new(
            LinkListMedia::new(&config.links_file, &config.media_download_path)?
                .keep(config.keep_media),
        ),
    };
    let media = match source.acquire().await {
        Ok(media) => media,
        Err(err) => {
            warn!(%err, "media acquisition failed");
            return Ok(RunOutcome::preflight_failure(
                day,
                "acquire-media",
                err.kind(),
                err.to_string(),
            ));
        }
    };

    let caption = match &args.caption {
        Some(caption) => caption.clone(),
        None => {
            let tags = TrendFeedTags::new(&config.trends_feed_url).tags().await;
            caption_for(day, &tags)
        }
    };
    info!(preview = %caption.chars().take(60).collect::<String>(), "caption ready");

    let bus = InMemoryBus::new(256);
    let event_log = spawn_event_log(bus.clone(), config.diagnostics_dir.join(EVENT_LOG));

    let settings = RunSettings {
        overall_timeout: config.overall_timeout(),
        verify_budget: config.verify_budget(),
        verify_poll: config.verify_poll(),
        settle: FixedSettle {
            default: Duration::from_millis(config.settle_ms),
            attach_file: Duration::from_millis(config.attach_settle_ms),
        },
        diagnostics_dir: Some(config.diagnostics_dir.clone()),
        ..RunSettings::default()
    };
    let orchestrator = Orchestrator::new(publish_flow(config), completion_signals(), settings)
        .with_bus(bus);
    let sessions = ChromiumSessions::new(
        CdpConfig::default()
            .headless(config.headless)
            .with_user_agent(&config.user_agent),
        &config.storage_state,
    );

    let outcome = orchestrator
        .execute(
            lease,
            &sessions,
            RunInputs {
                media_path: media.path.clone(),
                caption,
            },
        )
        .await;
    drop(orchestrator);
    match event_log.await {
        Ok(count) => info!(events = count, "event log written"),
        Err(err) => warn!(%err, "event log task failed"),
    }
    media.cleanup().await;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_flow::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn interrupt_abandons_the_run_and_frees_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
        let lease = ledger.acquire().unwrap();

        let stuck = async {
            let _holding = &lease;
            std::future::pending::<()>().await;
        };
        let interrupt = tokio::time::sleep(Duration::from_secs(3));
        assert!(unless_interrupted(stuck, interrupt).await.is_none());

        let outcome = RunOutcome::interrupted(lease.read());
        drop(lease);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Interrupted));
        assert_eq!(outcome.exit_code(), 1);
        assert!(!ledger.lock_path().exists());
        assert!(ledger.acquire().is_ok());
    }

    #[tokio::test]
    async fn finished_work_wins_over_a_pending_interrupt() {
        let out = unless_interrupted(async { 7 }, std::future::pending()).await;
        assert_eq!(out, Some(7));
    }
}
