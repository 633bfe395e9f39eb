//! Completion verifier
//!
//! Polls after the submit step for a negative or positive confirmation signal.
//! Neither within the budget yields [`Verdict::Ambiguous`], which is never
//! treated as success.

use std::sync::Arc;

use action_locator::{CandidateStrategy, ElementResolver};
use cdp_adapter::Cdp;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// Something observable on the page after submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Element(CandidateStrategy),
    Text(String),
    UrlContains(String),
}

impl Signal {
    pub fn label(&self) -> String {
        match self {
            Signal::Element(candidate) => candidate.describe(),
            Signal::Text(text) => format!("text:'{}'", text),
            Signal::UrlContains(part) => format!("url:'{}'", part),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionSignals {
    pub positive: Vec<Signal>,
    pub negative: Vec<Signal>,
    /// Words that hint at success without confirming it
    pub weak_hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Success { signal: String },
    Failure { signal: String },
    Ambiguous { weak_hint: Option<String> },
}

impl Verdict {
    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Success { .. } => "success",
            Verdict::Failure { .. } => "failure",
            Verdict::Ambiguous { .. } => "ambiguous",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success { .. })
    }
}

pub struct CompletionVerifier {
    page: Arc<dyn Cdp>,
    resolver: Arc<dyn ElementResolver>,
    signals: CompletionSignals,
    poll_interval: Duration,
}

struct Snapshot {
    text: String,
    url: String,
}

impl CompletionVerifier {
    pub fn new(
        page: Arc<dyn Cdp>,
        resolver: Arc<dyn ElementResolver>,
        signals: CompletionSignals,
    ) -> Self {
        Self {
            page,
            resolver,
            signals,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn snapshot(&self) -> Snapshot {
        let text = self.page.page_text().await.unwrap_or_else(|err| {
            debug!(%err, "page text unavailable");
            String::new()
        });
        let url = self.page.current_url().await.unwrap_or_default();
        Snapshot { text, url }
    }

    async fn observed(&self, signal: &Signal, snapshot: &Snapshot) -> bool {
        match signal {
            Signal::Element(candidate) => {
                matches!(self.resolver.probe(candidate, true).await, Ok(Some(_)))
            }
            Signal::Text(text) => snapshot.text.contains(text.as_str()),
            Signal::UrlContains(part) => snapshot.url.contains(part.as_str()),
        }
    }

    /// Poll for up to `budget`.
    pub async fn verify(&self, budget: Duration) -> Verdict {
        let deadline = Instant::now() + budget;
        let mut polls = 0u32;
        loop {
            polls += 1;
            let snapshot = self.snapshot().await;

            // Negative first: an explicit error outranks a stale success banner.
            for signal in &self.signals.negative {
                if self.observed(signal, &snapshot).await {
                    warn!(signal = %signal.label(), polls, "completion failed");
                    return Verdict::Failure {
                        signal: signal.label(),
                    };
                }
            }
            for signal in &self.signals.positive {
                if self.observed(signal, &snapshot).await {
                    info!(signal = %signal.label(), polls, "completion confirmed");
                    return Verdict::Success {
                        signal: signal.label(),
                    };
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        let text = self.snapshot().await.text.to_lowercase();
        let weak_hint = self
            .signals
            .weak_hints
            .iter()
            .find(|hint| text.contains(&hint.to_lowercase()))
            .cloned();
        warn!(polls, ?weak_hint, "no completion signal within budget");
        Verdict::Ambiguous { weak_hint }
    }
}
