//! Filesystem diagnostic sink
//!
//! Screenshots and HTML snapshots land in the run's diagnostics directory,
//! named `<run>-<label>.png|html`. Structured events go out on the in-memory
//! bus; [`spawn_event_log`] drains them into `events.jsonl`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_flow::{DiagnosticEvent, DiagnosticSink};
use async_trait::async_trait;
use cdp_adapter::Cdp;
use postflow_event_bus::{to_mpsc, EventBus, InMemoryBus};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type DiagnosticBus = InMemoryBus<DiagnosticEvent>;

const BUS_CAPACITY: usize = 256;

pub struct FsDiagnosticSink {
    dir: PathBuf,
    prefix: String,
    bus: Arc<DiagnosticBus>,
}

impl FsDiagnosticSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::with_bus(dir, prefix, InMemoryBus::new(BUS_CAPACITY))
    }

    pub fn with_bus(dir: impl Into<PathBuf>, prefix: impl Into<String>, bus: Arc<DiagnosticBus>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            bus,
        }
    }

    pub fn bus(&self) -> Arc<DiagnosticBus> {
        self.bus.clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact(&self, label: &str, ext: &str) -> PathBuf {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}-{}.{}", self.prefix, label, ext))
    }

    async fn write(&self, path: PathBuf, data: &[u8]) -> Option<PathBuf> {
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), %err, "cannot create diagnostics dir");
            return None;
        }
        match tokio::fs::write(&path, data).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(path = %path.display(), %err, "diagnostic write failed");
                None
            }
        }
    }
}

#[async_trait]
impl DiagnosticSink for FsDiagnosticSink {
    fn record(&self, event: DiagnosticEvent) {
        debug!(step = ?event.step, kind = ?event.kind, "diagnostic event");
        self.bus.emit(event);
    }

    async fn capture(&self, page: &dyn Cdp, label: &str, html: bool) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        match page.screenshot().await {
            Ok(png) => paths.extend(self.write(self.artifact(label, "png"), &png).await),
            Err(err) => warn!(label, %err, "screenshot failed"),
        }
        if html {
            match page.content().await {
                Ok(content) => paths.extend(
                    self.write(self.artifact(label, "html"), content.as_bytes())
                        .await,
                ),
                Err(err) => warn!(label, %err, "html snapshot failed"),
            }
        }
        paths
    }
}

/// Append every bus event to `path` as one JSON line. Ends once every bus
/// handle has been dropped.
pub fn spawn_event_log(bus: Arc<DiagnosticBus>, path: PathBuf) -> JoinHandle<usize> {
    let mut rx = to_mpsc(bus, BUS_CAPACITY);
    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "event log unavailable");
                return 0;
            }
        };
        let mut written = 0;
        while let Some(event) = rx.recv().await {
            let Ok(mut line) = serde_json::to_vec(&event) else {
                continue;
            };
            line.push(b'\n');
            if file.write_all(&line).await.is_ok() {
                written += 1;
            }
        }
        let _ = file.flush().await;
        written
    })
}
