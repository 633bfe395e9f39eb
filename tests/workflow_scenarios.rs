//! End-to-end runs of the publishing workflow against a scripted page.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{CompletionSignals, ErrorKind, Flow, Signal, Step, StepAction, Verdict};
use action_locator::{CandidateStrategy, LocatorSpec};
use async_trait::async_trait;
use cdp_adapter::{Cdp, Effect, JournalEntry, MemoryNode, MemoryPage, NodeKey};
use postflow_cli::config::Config;
use postflow_cli::orchestrator::OPEN_SESSION_STEP;
use postflow_cli::workflow::{completion_signals, publish_flow};
use postflow_cli::{
    Orchestrator, ProvidedSession, RunError, RunInputs, RunLedger, RunSettings, RunStatus,
    SessionProvider,
};
use tempfile::TempDir;

struct Composer {
    page: Arc<MemoryPage>,
    select: NodeKey,
}

/// A composer page whose share button reveals `banner` three seconds later.
fn composer(banner: &str, with_select_button: bool) -> Composer {
    let page = Arc::new(MemoryPage::new("about:blank"));
    let banner = page.add(MemoryNode::new("div").text(banner).hidden());
    let share = page.add(
        MemoryNode::new("div")
            .selector(r#"div[role="button"]"#)
            .attr("role", "button")
            .text("Share")
            .hidden()
            .on_click(Effect::ShowAfter(banner, Duration::from_secs(3))),
    );
    let caption = page.add(
        MemoryNode::new("div")
            .selector(r#"div[aria-label="Write a caption..."]"#)
            .attr("contenteditable", "true")
            .hidden(),
    );
    let next2 = page.add(
        MemoryNode::new("div")
            .selector(r#"div[role="button"]"#)
            .attr("role", "button")
            .text("Next")
            .hidden(),
    );
    page.on_click(next2, Effect::Hide(next2));
    page.on_click(next2, Effect::Show(caption));
    page.on_click(next2, Effect::Show(share));
    let next1 = page.add(
        MemoryNode::new("div")
            .selector(r#"div[role="button"]"#)
            .attr("role", "button")
            .text("Next")
            .hidden(),
    );
    page.on_click(next1, Effect::Hide(next1));
    page.on_click(next1, Effect::Show(next2));
    page.on_inject(Effect::ShowAfter(next1, Duration::from_secs(1)));

    let select = page.add(
        MemoryNode::new("button")
            .selector("button._aswp")
            .text("Select from computer")
            .hidden(),
    );
    if !with_select_button {
        page.on_navigate("instagram.com", Effect::Detach(select));
    }
    let create = page.add(MemoryNode::new("a").text("Create").hidden());
    page.on_click(create, Effect::Show(select));
    page.on_navigate("instagram.com", Effect::Show(create));

    Composer { page, select }
}

struct Fixture {
    _dir: TempDir,
    ledger: RunLedger,
    media: PathBuf,
    diagnostics: PathBuf,
}

fn fixture(day: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
    std::fs::write(ledger.path(), day.to_string()).unwrap();
    let media = dir.path().join("video.mp4");
    std::fs::write(&media, b"not really a video").unwrap();
    let diagnostics = dir.path().join("diagnostics");
    Fixture {
        ledger,
        media,
        diagnostics,
        _dir: dir,
    }
}

fn settings(fx: &Fixture) -> RunSettings {
    RunSettings {
        verify_budget: Duration::from_secs(10),
        diagnostics_dir: Some(fx.diagnostics.clone()),
        ..RunSettings::default()
    }
}

fn inputs(fx: &Fixture, day: u64) -> RunInputs {
    RunInputs {
        media_path: fx.media.clone(),
        caption: format!("Reminder – Day {day}\n\n#motivation"),
    }
}

#[tokio::test(start_paused = true)]
async fn confirmed_success_advances_ledger_by_one() {
    let fx = fixture(5);
    let composer = composer("Your post has been shared.", true);
    let orchestrator = Orchestrator::new(
        publish_flow(&Config::default()),
        completion_signals(),
        settings(&fx),
    );
    let lease = fx.ledger.acquire().unwrap();
    let outcome = orchestrator
        .execute(&lease, &ProvidedSession::new(composer.page.clone()), inputs(&fx, 5))
        .await;
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Success, "{outcome:?}");
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!((outcome.ledger_before, outcome.ledger_after), (5, 6));
    assert_eq!(fx.ledger.peek(), 6);
    assert!(composer.page.is_closed());

    // The original picker button was replaced, never clicked, and the media
    // went to the injected input.
    let journal = composer.page.journal();
    assert!(!journal.contains(&JournalEntry::Click {
        node: composer.select
    }));
    assert!(journal
        .iter()
        .any(|e| matches!(e, JournalEntry::Replace { original, .. } if *original == composer.select)));
    assert!(journal
        .iter()
        .any(|e| matches!(e, JournalEntry::Files { files, .. } if files == &vec![fx.media.clone()])));

    let names: Vec<&str> = outcome.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(
        names,
        ["open-home", "open-composer", "attach-media", "next#1", "next#2", "caption", "share"]
    );
    assert!(!outcome.artifacts.is_empty());
    assert!(outcome.artifacts.iter().all(|p| p.exists()));
}

#[tokio::test(start_paused = true)]
async fn ambiguous_completion_keeps_ledger_and_fails_the_process() {
    let fx = fixture(5);
    let composer = composer("Reel shared to your profile", true);
    let orchestrator = Orchestrator::new(
        publish_flow(&Config::default()),
        completion_signals(),
        settings(&fx),
    );
    let lease = fx.ledger.acquire().unwrap();
    let outcome = orchestrator
        .execute(&lease, &ProvidedSession::new(composer.page.clone()), inputs(&fx, 5))
        .await;
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Ambiguous);
    assert_ne!(outcome.exit_code(), 0);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Ambiguous));
    assert!(matches!(
        outcome.verdict,
        Some(Verdict::Ambiguous { weak_hint: Some(ref hint) }) if hint == "shared"
    ));
    assert_eq!(outcome.ledger_after, 5);
    assert_eq!(fx.ledger.peek(), 5);
}

#[tokio::test(start_paused = true)]
async fn negative_signal_is_a_failure() {
    let fx = fixture(5);
    let composer = composer("Your post could not be shared. Try again.", true);
    let orchestrator = Orchestrator::new(
        publish_flow(&Config::default()),
        completion_signals(),
        settings(&fx),
    );
    let lease = fx.ledger.acquire().unwrap();
    let outcome = orchestrator
        .execute(&lease, &ProvidedSession::new(composer.page.clone()), inputs(&fx, 5))
        .await;
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.error_kind, Some(ErrorKind::CompletionFailed));
    assert_eq!(fx.ledger.peek(), 5);
}

#[tokio::test(start_paused = true)]
async fn required_step_not_found_aborts_within_its_own_timeout() {
    let fx = fixture(5);
    let composer = composer("Your post has been shared.", false);
    let flow = publish_flow(&Config::default());
    let attach_timeout = flow
        .steps
        .iter()
        .find(|s| s.name == "attach-media")
        .unwrap()
        .timeout();
    let orchestrator = Orchestrator::new(flow, completion_signals(), settings(&fx));
    let lease = fx.ledger.acquire().unwrap();
    let outcome = orchestrator
        .execute(&lease, &ProvidedSession::new(composer.page.clone()), inputs(&fx, 5))
        .await;
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.step.as_deref(), Some("attach-media"));
    assert_eq!(outcome.error_kind, Some(ErrorKind::ElementNotFound));
    let failed = outcome.steps.last().unwrap();
    assert_eq!(failed.step_id, "attach-media");
    assert!(failed.latency_ms <= attach_timeout.as_millis() as u64);
    assert!(outcome.elapsed_ms < RunSettings::default().overall_timeout.as_millis() as u64);
    // Abort diagnostics include an HTML snapshot.
    assert!(outcome
        .artifacts
        .iter()
        .any(|p| p.extension().is_some_and(|e| e == "html")));
    assert_eq!(fx.ledger.peek(), 5);
    assert!(composer.page.is_closed());
}

#[tokio::test(start_paused = true)]
async fn overall_timeout_cuts_a_slow_step_short() {
    let fx = fixture(5);
    let page = Arc::new(MemoryPage::new("about:blank"));
    let slow = LocatorSpec::new("slow")
        .candidate(CandidateStrategy::css("button.never"))
        .candidate(CandidateStrategy::css("button.nope"))
        .candidate(CandidateStrategy::css("button.absent"))
        .candidate_budget(Duration::from_secs(30))
        .step_timeout(Duration::from_secs(90));
    let flow = Flow::new("timed", "timed")
        .step(Step::navigate("open", "https://example.test/", Duration::from_secs(5)))
        .step(Step::new("slow", slow, StepAction::Click))
        .step(Step::navigate("never", "https://example.test/never", Duration::from_secs(5)));
    let signals = CompletionSignals {
        positive: vec![Signal::Text("done".into())],
        ..CompletionSignals::default()
    };
    let orchestrator = Orchestrator::new(
        flow,
        signals,
        RunSettings {
            overall_timeout: Duration::from_secs(60),
            ..settings(&fx)
        },
    );
    let lease = fx.ledger.acquire().unwrap();
    let started = tokio::time::Instant::now();
    let outcome = orchestrator
        .execute(&lease, &ProvidedSession::new(page.clone()), inputs(&fx, 5))
        .await;
    let elapsed = started.elapsed();
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::OverallTimeoutExceeded));
    assert_eq!(outcome.step.as_deref(), Some("slow"));
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(75));
    assert!(!page
        .journal()
        .iter()
        .any(|e| matches!(e, JournalEntry::Navigate { url } if url.ends_with("/never"))));
    assert!(page.is_closed());
    assert_eq!(fx.ledger.peek(), 5);
}

#[tokio::test]
async fn missing_session_is_an_external_resource_error() {
    let fx = fixture(3);
    let sessions = postflow_cli::ChromiumSessions::new(
        cdp_adapter::CdpConfig::default(),
        fx.diagnostics.join("missing_state.json"),
    );
    let orchestrator = Orchestrator::new(
        publish_flow(&Config::default()),
        completion_signals(),
        settings(&fx),
    );
    let lease = fx.ledger.acquire().unwrap();
    let outcome = orchestrator.execute(&lease, &sessions, inputs(&fx, 3)).await;
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::ExternalResourceError));
    assert_eq!(fx.ledger.peek(), 3);
}

/// Session acquisition that hangs far past any sane budget.
struct HangingSession;

#[async_trait]
impl SessionProvider for HangingSession {
    async fn open(&self) -> Result<Arc<dyn Cdp>, RunError> {
        tokio::time::sleep(Duration::from_secs(90)).await;
        Ok(Arc::new(MemoryPage::new("about:blank")))
    }
}

#[tokio::test(start_paused = true)]
async fn overall_timeout_covers_session_acquisition() {
    let fx = fixture(5);
    let orchestrator = Orchestrator::new(
        publish_flow(&Config::default()),
        completion_signals(),
        RunSettings {
            overall_timeout: Duration::from_secs(60),
            ..settings(&fx)
        },
    );
    let lease = fx.ledger.acquire().unwrap();
    let started = tokio::time::Instant::now();
    let outcome = orchestrator.execute(&lease, &HangingSession, inputs(&fx, 5)).await;
    let elapsed = started.elapsed();
    drop(lease);

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.error_kind, Some(ErrorKind::OverallTimeoutExceeded));
    assert_eq!(outcome.step.as_deref(), Some(OPEN_SESSION_STEP));
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(61));
    assert_eq!(fx.ledger.peek(), 5);
}
