//! Candidate cascade resolver

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, Cdp};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{errors::LocatorError, strategies::*, types::*};

/// Element resolver trait
#[async_trait]
pub trait ElementResolver: Send + Sync {
    /// Walk the candidates in order and return the first acceptable element.
    async fn resolve(&self, spec: &LocatorSpec) -> Result<Resolution, LocatorError>;

    /// Evaluate one candidate once, without waiting.
    async fn probe(
        &self,
        candidate: &CandidateStrategy,
        require_visible: bool,
    ) -> Result<Option<ElementHandle>, LocatorError>;
}

/// Single evaluation of a candidate against the live page.
enum Evaluation {
    Accepted(ElementHandle),
    TextMismatch(String),
    Disabled,
    Missing,
    Failed { reason: String, retriable: bool },
}

/// Default element resolver implementation
pub struct DefaultElementResolver {
    page: Arc<dyn Cdp>,
    structural: Arc<StructuralStrategy>,
    text: Arc<TextStrategy>,
    attribute: Arc<AttributeStrategy>,
}

impl DefaultElementResolver {
    pub fn new(page: Arc<dyn Cdp>) -> Self {
        Self {
            page,
            structural: Arc::new(StructuralStrategy),
            text: Arc::new(TextStrategy::default()),
            attribute: Arc::new(AttributeStrategy),
        }
    }

    fn get_strategy(&self, kind: StrategyKind) -> Arc<dyn Strategy> {
        match kind {
            StrategyKind::Structural => self.structural.clone(),
            StrategyKind::Text => self.text.clone(),
            StrategyKind::Attribute => self.attribute.clone(),
        }
    }

    fn validate(&self, spec: &LocatorSpec) -> Result<(), LocatorError> {
        if spec.candidates.is_empty() {
            return Err(LocatorError::invalid(&spec.name, "no candidates"));
        }
        if spec.poll_interval.is_zero() {
            return Err(LocatorError::invalid(&spec.name, "poll interval must be non-zero"));
        }
        for candidate in &spec.candidates {
            self.get_strategy(candidate.kind).compile(candidate)?;
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        index: usize,
        candidate: &CandidateStrategy,
        require_visible: bool,
    ) -> Evaluation {
        let strategy = self.get_strategy(candidate.kind);
        let nodes = match strategy.find(self.page.as_ref(), candidate).await {
            Ok(nodes) => nodes,
            Err(err) => return Evaluation::failed(&err),
        };

        let mut mismatch: Option<String> = None;
        let mut disabled = false;
        for node in nodes {
            let state = match self.page.inspect(&node).await {
                Ok(state) => state,
                Err(err) if err.is_stale() => continue,
                Err(err) => return Evaluation::failed(&err),
            };
            if require_visible && !state.visible {
                continue;
            }
            if let Some(required) = &candidate.required_substring {
                if !state.text.contains(required.as_str()) {
                    mismatch.get_or_insert_with(|| state.text.clone());
                    continue;
                }
            }
            if !state.enabled {
                disabled = true;
                continue;
            }
            return Evaluation::Accepted(ElementHandle::from_state(
                node,
                &state,
                candidate.kind,
                index,
            ));
        }

        // A right-text node that is only disabled outranks a wrong-text node.
        match (disabled, mismatch) {
            (true, _) => Evaluation::Disabled,
            (false, Some(observed)) => Evaluation::TextMismatch(observed),
            (false, None) => Evaluation::Missing,
        }
    }
}

impl Evaluation {
    fn failed(err: &AdapterError) -> Self {
        Evaluation::Failed {
            reason: err.to_string(),
            retriable: err.retriable,
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[async_trait]
impl ElementResolver for DefaultElementResolver {
    async fn resolve(&self, spec: &LocatorSpec) -> Result<Resolution, LocatorError> {
        self.validate(spec)?;
        info!(step = %spec.name, candidates = spec.candidates.len(), "resolving element");

        let started = Instant::now();
        let step_deadline = started + spec.step_timeout;
        let mut attempts = Vec::with_capacity(spec.candidates.len());

        for (index, candidate) in spec.candidates.iter().enumerate() {
            let now = Instant::now();
            let remaining = step_deadline.saturating_duration_since(now);
            let budget = spec.budget_for(candidate).min(remaining);
            let attempt_started = now;

            if remaining.is_zero() {
                debug!(step = %spec.name, candidate = index, "step timeout spent, skipping");
                attempts.push(CandidateAttempt {
                    index,
                    kind: candidate.kind,
                    expression: candidate.expression.clone(),
                    outcome: AttemptOutcome::Skipped,
                    elapsed_ms: 0,
                });
                continue;
            }

            let deadline = attempt_started + budget;
            let mut outcome = AttemptOutcome::TimedOut;
            loop {
                match self.evaluate(index, candidate, spec.require_visible).await {
                    Evaluation::Accepted(handle) => {
                        attempts.push(CandidateAttempt {
                            index,
                            kind: candidate.kind,
                            expression: candidate.expression.clone(),
                            outcome: AttemptOutcome::Accepted,
                            elapsed_ms: elapsed_ms(attempt_started),
                        });
                        info!(
                            step = %spec.name,
                            candidate = index,
                            strategy = candidate.kind.name(),
                            node = %handle.node(),
                            elapsed_ms = elapsed_ms(started),
                            "element resolved"
                        );
                        return Ok(Resolution::Found { handle, attempts });
                    }
                    Evaluation::TextMismatch(observed) => {
                        debug!(
                            step = %spec.name,
                            candidate = index,
                            observed = %observed,
                            "text check rejected match"
                        );
                        outcome = AttemptOutcome::TextMismatch { observed };
                        break;
                    }
                    Evaluation::Failed {
                        reason,
                        retriable: true,
                    } => {
                        debug!(step = %spec.name, candidate = index, %reason, "transient driver error, polling on");
                        outcome = AttemptOutcome::Error { reason };
                    }
                    Evaluation::Failed { reason, .. } => {
                        warn!(step = %spec.name, candidate = index, %reason, "candidate failed");
                        outcome = AttemptOutcome::Error { reason };
                        break;
                    }
                    Evaluation::Disabled => outcome = AttemptOutcome::NotInteractable,
                    Evaluation::Missing => outcome = AttemptOutcome::TimedOut,
                }

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let pause: Duration = spec.poll_interval.min(deadline - now);
                tokio::time::sleep(pause).await;
            }

            debug!(
                step = %spec.name,
                candidate = index,
                expression = %candidate.expression,
                ?outcome,
                "candidate exhausted"
            );
            attempts.push(CandidateAttempt {
                index,
                kind: candidate.kind,
                expression: candidate.expression.clone(),
                outcome,
                elapsed_ms: elapsed_ms(attempt_started),
            });
        }

        warn!(
            step = %spec.name,
            elapsed_ms = elapsed_ms(started),
            "all candidates exhausted"
        );
        Ok(Resolution::NotFound { attempts })
    }

    async fn probe(
        &self,
        candidate: &CandidateStrategy,
        require_visible: bool,
    ) -> Result<Option<ElementHandle>, LocatorError> {
        self.get_strategy(candidate.kind).compile(candidate)?;
        match self.evaluate(0, candidate, require_visible).await {
            Evaluation::Accepted(handle) => Ok(Some(handle)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{Effect, MemoryNode, MemoryPage};

    fn resolver(page: &Arc<MemoryPage>) -> DefaultElementResolver {
        DefaultElementResolver::new(page.clone() as Arc<dyn Cdp>)
    }

    fn spec() -> LocatorSpec {
        LocatorSpec::new("next")
            .candidate_budget(Duration::from_secs(3))
            .poll_interval(Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn third_candidate_wins_after_two_timeouts() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let target = page.add(MemoryNode::new("button").selector("button.c").text("Next"));

        let spec = spec()
            .candidate(CandidateStrategy::css("button.a"))
            .candidate(CandidateStrategy::css("button.b"))
            .candidate(CandidateStrategy::css("button.c"));

        let started = Instant::now();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        let elapsed = started.elapsed();

        let attempts = resolution.attempts().to_vec();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].outcome, AttemptOutcome::TimedOut);
        assert_eq!(attempts[1].outcome, AttemptOutcome::TimedOut);
        assert_eq!(attempts[2].outcome, AttemptOutcome::Accepted);
        assert!(elapsed <= Duration::from_secs(9));
        assert!(elapsed >= Duration::from_secs(6));

        let handle = resolution.into_handle().unwrap();
        assert_eq!(handle.node(), &page.node_ref(target));
        assert_eq!(handle.candidate_index(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_text_is_never_accepted() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        page.add(
            MemoryNode::new("div")
                .selector("div[role=\"button\"]")
                .text("Cancel"),
        );
        let share = page.add(MemoryNode::new("div").selector("div.share").text("Share"));

        let spec = spec()
            .candidate(CandidateStrategy::css("div[role=\"button\"]").requiring("Share"))
            .candidate(CandidateStrategy::css("div.share").requiring("Share"));

        let started = Instant::now();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        assert_eq!(
            resolution.attempts()[0].outcome,
            AttemptOutcome::TextMismatch {
                observed: "Cancel".into()
            }
        );
        // A mismatch moves on immediately instead of waiting out the budget.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            resolution.into_handle().unwrap().node(),
            &page.node_ref(share)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn element_appearing_mid_budget_is_found() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let late = page.add(
            MemoryNode::new("button")
                .selector("button.late")
                .appears_after(Duration::from_millis(1200)),
        );
        let spec = spec().candidate(CandidateStrategy::css("button.late"));

        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        assert_eq!(
            resolution.into_handle().unwrap().node(),
            &page.node_ref(late)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_control_keeps_polling_until_enabled() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let button = page.add(
            MemoryNode::new("button")
                .selector("button.next")
                .text("Next")
                .disabled(),
        );
        let enabler = page.add(
            MemoryNode::new("input")
                .selector("input.upload")
                .on_click(Effect::Enable(button)),
        );

        let spec = spec().candidate(CandidateStrategy::css("button.next"));
        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        assert_eq!(
            resolution.attempts()[0].outcome,
            AttemptOutcome::NotInteractable
        );

        page.click(&page.node_ref(enabler)).await.unwrap();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        assert!(resolution.is_found());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_query_error_keeps_the_candidate_polling() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let next = page.add(MemoryNode::new("button").selector("button.next").text("Next"));
        page.fail_next_queries(1);

        let spec = spec()
            .candidate_budget(Duration::from_secs(5))
            .candidate(CandidateStrategy::css("button.next"));
        let started = Instant::now();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();

        assert_eq!(resolution.attempts().len(), 1);
        assert_eq!(resolution.attempts()[0].outcome, AttemptOutcome::Accepted);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(
            resolution.into_handle().unwrap().node(),
            &page.node_ref(next)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_text_match_outranks_enabled_wrong_text() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        page.add(
            MemoryNode::new("div")
                .selector("div[role=\"button\"]")
                .text("Back"),
        );
        let next = page.add(
            MemoryNode::new("div")
                .selector("div[role=\"button\"]")
                .text("Next")
                .disabled(),
        );
        let upload = page.add(MemoryNode::new("input").on_click(Effect::Enable(next)));
        let background = page.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            background.click(&background.node_ref(upload)).await.unwrap();
        });

        let spec = spec()
            .candidate_budget(Duration::from_secs(5))
            .candidate(CandidateStrategy::css("div[role=\"button\"]").requiring("Next"));
        let started = Instant::now();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();

        assert_eq!(resolution.attempts()[0].outcome, AttemptOutcome::Accepted);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            resolution.into_handle().unwrap().node(),
            &page.node_ref(next)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_bounds_the_cascade() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let spec = spec()
            .step_timeout(Duration::from_secs(4))
            .candidate(CandidateStrategy::css("a.one"))
            .candidate(CandidateStrategy::css("a.two"))
            .candidate(CandidateStrategy::css("a.three"));

        let started = Instant::now();
        let resolution = resolver(&page).resolve(&spec).await.unwrap();
        assert!(!resolution.is_found());
        assert!(started.elapsed() <= Duration::from_secs(4));
        assert_eq!(resolution.attempts()[2].outcome, AttemptOutcome::Skipped);
    }

    #[tokio::test]
    async fn hidden_nodes_need_opt_in() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        page.add(MemoryNode::new("input").attr("id", "picker").hidden());
        let resolver = resolver(&page);
        let candidate = CandidateStrategy::css("#picker");

        assert!(resolver.probe(&candidate, true).await.unwrap().is_none());
        assert!(resolver.probe(&candidate, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_spec_is_rejected() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let err = resolver(&page).resolve(&spec()).await.unwrap_err();
        assert!(matches!(err, LocatorError::InvalidSpec { .. }));
    }
}
