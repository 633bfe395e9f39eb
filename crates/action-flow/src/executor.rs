//! Step state machine

use std::sync::Arc;

use action_locator::{DefaultElementResolver, ElementHandle, ElementResolver};
use action_primitives::{
    Action, ActionPrimitives, ActionReport, DefaultActionPrimitives, FixedSettle,
    MutationSafeBinder,
};
use async_trait::async_trait;
use cdp_adapter::Cdp;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, EventKind, NullSink};
use crate::errors::FlowError;
use crate::strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult};
use crate::types::*;

/// Flow executor trait
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Run every step in order. `Err` only for flows that fail validation;
    /// step failures end up in [`FlowResult::outcome`].
    async fn execute(&self, flow: &Flow, ctx: &mut RunContext) -> Result<FlowResult, FlowError>;

    /// Validate flow structure
    fn validate_flow(&self, flow: &Flow) -> Result<(), FlowError>;
}

/// Default flow executor implementation
pub struct DefaultFlowExecutor {
    page: Arc<dyn Cdp>,
    resolver: Arc<dyn ElementResolver>,
    primitives: Arc<dyn ActionPrimitives>,
    binder: Arc<MutationSafeBinder>,
    failure_handler: Arc<dyn FailureHandler>,
    sink: Arc<dyn DiagnosticSink>,
    poll_interval: Duration,
}

impl DefaultFlowExecutor {
    pub fn new(
        page: Arc<dyn Cdp>,
        resolver: Arc<dyn ElementResolver>,
        primitives: Arc<dyn ActionPrimitives>,
        binder: Arc<MutationSafeBinder>,
    ) -> Self {
        Self {
            page,
            resolver,
            primitives,
            binder,
            failure_handler: Arc::new(DefaultFailureHandler::new()),
            sink: Arc::new(NullSink),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Wire the default resolver, executor and binder around one page.
    pub fn for_page(page: Arc<dyn Cdp>, settle: FixedSettle) -> Self {
        let resolver: Arc<dyn ElementResolver> =
            Arc::new(DefaultElementResolver::new(page.clone()));
        let primitives: Arc<dyn ActionPrimitives> = Arc::new(
            DefaultActionPrimitives::new(page.clone()).with_wait_strategy(Arc::new(settle)),
        );
        let binder = Arc::new(MutationSafeBinder::new(page.clone(), resolver.clone()));
        Self::new(page, resolver, primitives, binder)
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn resolver(&self) -> Arc<dyn ElementResolver> {
        self.resolver.clone()
    }

    fn enter(&self, result: &mut StepResult, run_id: &str, state: StepState) {
        debug!(run_id, step = %result.step_id, ?state, "state entered");
        result.enter(state);
        self.sink.record(DiagnosticEvent::new(
            run_id,
            Some(&result.step_id),
            EventKind::StateEntered { state },
        ));
    }

    async fn execute_step(
        &self,
        step: &Step,
        name: &str,
        required: bool,
        ctx: &mut RunContext,
    ) -> StepResult {
        ctx.current_step = Some(name.to_string());
        info!(run_id = %ctx.run_id, step = name, action = step.action.name(), "step started");
        self.sink.record(DiagnosticEvent::new(
            &ctx.run_id,
            Some(name),
            EventKind::StepStarted,
        ));
        let mut result = StepResult::new(name.to_string(), step.action.name().to_string());

        if step.action == StepAction::EnterCaption && ctx.caption.trim().is_empty() && !required {
            ctx.note(format!("{name}: empty caption, skipped"));
            return self.skip(result, ctx).await;
        }

        let mut failures = 0u32;
        let mut fallback_used = false;
        loop {
            let handle = if step.action.needs_element() {
                self.enter(&mut result, &ctx.run_id, StepState::Locating);
                let resolution = match self.resolver.resolve(&step.locator).await {
                    Ok(resolution) => resolution,
                    Err(err) => return self.abort(result, ctx, err.into()).await,
                };
                result.attempts = resolution.attempts().to_vec();
                match resolution.into_handle() {
                    Some(handle) => Some(handle),
                    None => match (&step.on_not_found, fallback_used) {
                        (NotFoundPolicy::Fallback(fallback), false) => {
                            self.enter(&mut result, &ctx.run_id, StepState::FallbackNavigating);
                            fallback_used = true;
                            result.fallback_used = true;
                            if let Err(err) = self.run_fallback(step, name, fallback).await {
                                return self.abort(result, ctx, err).await;
                            }
                            continue;
                        }
                        _ if required => {
                            return self
                                .abort(result, ctx, FlowError::NotFound(name.to_string()))
                                .await
                        }
                        _ => return self.skip(result, ctx).await,
                    },
                }
            } else {
                None
            };

            self.enter(&mut result, &ctx.run_id, StepState::Acting);
            let failure = match self.act(step, name, handle, ctx).await {
                Ok(report) => {
                    result.action_report = report;
                    match &step.post_condition {
                        Some(condition) => {
                            self.enter(&mut result, &ctx.run_id, StepState::Verifying);
                            if self.poll_condition(condition, step.timeout()).await {
                                None
                            } else {
                                Some(FlowError::PostCondition {
                                    step: name.to_string(),
                                    condition: condition.to_string(),
                                })
                            }
                        }
                        None => None,
                    }
                }
                Err(err) => Some(err),
            };

            let Some(err) = failure else {
                return self.advance(result, ctx).await;
            };

            failures += 1;
            match self
                .failure_handler
                .handle_failure(name, step.retry_budget, &err, failures)
                .await
            {
                FailureHandlerResult::Retry { attempt, .. } => {
                    result.retry_attempts = attempt;
                    self.enter(&mut result, &ctx.run_id, StepState::Retrying);
                }
                FailureHandlerResult::Abort(reason) => {
                    return self.abort_with(result, ctx, err.kind(), reason).await;
                }
            }
        }
    }

    async fn act(
        &self,
        step: &Step,
        name: &str,
        handle: Option<ElementHandle>,
        ctx: &mut RunContext,
    ) -> Result<Option<ActionReport>, FlowError> {
        let Some(action) = step.action.bind(ctx) else {
            if let StepAction::Navigate { url } = &step.action {
                self.page
                    .navigate(url, step.timeout())
                    .await
                    .map_err(action_primitives::ActionError::from_adapter)?;
            }
            return Ok(None);
        };
        let Some(handle) = handle else {
            return Err(FlowError::NotFound(name.to_string()));
        };

        let target = if step.mutates_dom {
            let bound = self.binder.bind_and_recover(handle, &step.locator).await?;
            ctx.note(format!(
                "{name}: rebound to {} (marker {})",
                bound.trigger.node(),
                bound.marker
            ));
            match &action {
                Action::AttachFile { .. } => bound.file_input,
                _ => bound.trigger,
            }
        } else {
            handle
        };

        let report = self.primitives.act(&target, &action).await?;
        Ok(Some(report))
    }

    async fn run_fallback(
        &self,
        step: &Step,
        name: &str,
        fallback: &FallbackAction,
    ) -> Result<(), FlowError> {
        info!(step = name, ?fallback, "element not found, running fallback");
        let outcome = match fallback {
            FallbackAction::Navigate { url } => self.page.navigate(url, step.timeout()).await,
            FallbackAction::PressKey { key } => self.page.press_key(key).await,
        };
        outcome.map_err(|err| FlowError::Fallback {
            step: name.to_string(),
            reason: err.to_string(),
        })
    }

    async fn check(&self, condition: &PostCondition) -> bool {
        match condition {
            PostCondition::Visible(candidate) => matches!(
                self.resolver.probe(candidate, true).await,
                Ok(Some(_))
            ),
            PostCondition::Hidden(candidate) => {
                matches!(self.resolver.probe(candidate, true).await, Ok(None))
            }
            PostCondition::UrlContains(needle) => self
                .page
                .current_url()
                .await
                .map(|url| url.contains(needle.as_str()))
                .unwrap_or(false),
            PostCondition::PageTextContains(needle) => self
                .page
                .page_text()
                .await
                .map(|text| text.contains(needle.as_str()))
                .unwrap_or(false),
        }
    }

    async fn poll_condition(&self, condition: &PostCondition, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check(condition).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(%condition, "post-condition not met");
                return false;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn advance(&self, mut result: StepResult, ctx: &mut RunContext) -> StepResult {
        self.enter(&mut result, &ctx.run_id, StepState::Advanced);
        let label = format!("{:02}-{}", ctx.step_index + 1, result.step_id);
        let artifacts = self.sink.capture(self.page.as_ref(), &label, false).await;
        ctx.artifacts.extend(artifacts.iter().cloned());
        self.sink.record(
            DiagnosticEvent::new(
                &ctx.run_id,
                Some(&result.step_id),
                EventKind::StepAdvanced { skipped: false },
            )
            .with_artifacts(artifacts.clone()),
        );
        info!(run_id = %ctx.run_id, step = %result.step_id, "step advanced");
        result.artifacts = artifacts;
        result.with_success().finish()
    }

    async fn skip(&self, mut result: StepResult, ctx: &mut RunContext) -> StepResult {
        self.enter(&mut result, &ctx.run_id, StepState::Advanced);
        self.sink.record(DiagnosticEvent::new(
            &ctx.run_id,
            Some(&result.step_id),
            EventKind::StepAdvanced { skipped: true },
        ));
        info!(run_id = %ctx.run_id, step = %result.step_id, "optional step skipped");
        result.with_skip().finish()
    }

    async fn abort(&self, result: StepResult, ctx: &mut RunContext, err: FlowError) -> StepResult {
        let kind = err.kind();
        self.abort_with(result, ctx, kind, err.to_string()).await
    }

    async fn abort_with(
        &self,
        mut result: StepResult,
        ctx: &mut RunContext,
        kind: ErrorKind,
        reason: String,
    ) -> StepResult {
        self.enter(&mut result, &ctx.run_id, StepState::Aborted);
        let label = format!("{:02}-{}-aborted", ctx.step_index + 1, result.step_id);
        let artifacts = self.sink.capture(self.page.as_ref(), &label, true).await;
        ctx.artifacts.extend(artifacts.iter().cloned());
        self.sink.record(
            DiagnosticEvent::new(
                &ctx.run_id,
                Some(&result.step_id),
                EventKind::StepAborted { kind },
            )
            .with_detail(reason.clone())
            .with_artifacts(artifacts.clone()),
        );
        warn!(run_id = %ctx.run_id, step = %result.step_id, %kind, %reason, "step aborted");
        result.artifacts = artifacts;
        result.with_error(kind, reason).finish()
    }
}

#[async_trait]
impl FlowExecutor for DefaultFlowExecutor {
    async fn execute(&self, flow: &Flow, ctx: &mut RunContext) -> Result<FlowResult, FlowError> {
        self.validate_flow(flow)?;
        info!(run_id = %ctx.run_id, flow = %flow.id, steps = flow.steps.len(), "flow started");

        let mut result = FlowResult::new(flow.id.clone());
        for (index, step) in flow.steps.iter().enumerate() {
            ctx.step_index = index;
            for instance in 1..=step.repeat {
                let name = if step.repeat > 1 {
                    format!("{}#{}", step.name, instance)
                } else {
                    step.name.clone()
                };
                // Only the first instance of a repeated step can be required.
                let required = step.required && instance == 1;
                let outcome = self.execute_step(step, &name, required, ctx).await;
                ctx.history.push(outcome.clone());

                let skipped = outcome.skipped;
                let failure = if outcome.success {
                    None
                } else {
                    Some((
                        outcome.error_kind.unwrap_or(ErrorKind::ActionFailed),
                        outcome.error.clone().unwrap_or_default(),
                    ))
                };
                result = result.with_step(outcome);

                if let Some((kind, reason)) = failure {
                    return Ok(result.aborted(name, kind, reason).finish());
                }
                if skipped {
                    break;
                }
            }
        }

        info!(run_id = %ctx.run_id, flow = %flow.id, "flow completed");
        Ok(result.finish())
    }

    fn validate_flow(&self, flow: &Flow) -> Result<(), FlowError> {
        if flow.steps.is_empty() {
            return Err(FlowError::ValidationFailed(format!(
                "flow {} has no steps",
                flow.id
            )));
        }
        for step in &flow.steps {
            match &step.action {
                StepAction::Navigate { url } if url.trim().is_empty() => {
                    return Err(FlowError::ValidationFailed(format!(
                        "step {} navigates to an empty URL",
                        step.name
                    )));
                }
                action if action.needs_element() && step.locator.candidates.is_empty() => {
                    return Err(FlowError::ValidationFailed(format!(
                        "step {} has no locator candidates",
                        step.name
                    )));
                }
                _ => {}
            }
            if step.repeat == 0 {
                return Err(FlowError::ValidationFailed(format!(
                    "step {} repeats zero times",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_locator::{CandidateStrategy, LocatorSpec};
    use cdp_adapter::{Effect, JournalEntry, MemoryNode, MemoryPage};
    use std::path::PathBuf;

    fn executor(page: &Arc<MemoryPage>) -> DefaultFlowExecutor {
        DefaultFlowExecutor::for_page(
            page.clone() as Arc<dyn Cdp>,
            FixedSettle::uniform(Duration::from_millis(100)),
        )
    }

    fn ctx() -> RunContext {
        RunContext::new("test-run", PathBuf::from("video.mp4"), "Reminder - Day 5")
    }

    fn locator(name: &str, selector: &str) -> LocatorSpec {
        LocatorSpec::new(name)
            .candidate(CandidateStrategy::css(selector))
            .candidate_budget(Duration::from_secs(2))
            .step_timeout(Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn required_step_not_found_aborts_within_step_timeout() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let flow = Flow::new("f", "f").step(Step::new(
            "open-composer",
            locator("open-composer", "a.create"),
            StepAction::Click,
        ));

        let started = Instant::now();
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert_eq!(
            result.outcome,
            FlowOutcome::Aborted {
                step: "open-composer".into(),
                kind: ErrorKind::ElementNotFound,
                reason: "Element not found for step open-composer".into(),
            }
        );
        let transitions = &result.step_results[0].transitions;
        assert_eq!(
            transitions,
            &vec![StepState::Pending, StepState::Locating, StepState::Aborted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_runs_once_then_relocates() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let create = page.add(MemoryNode::new("a").selector("a.create").detached());
        page.on_navigate("/create/", Effect::Attach(create));

        let flow = Flow::new("f", "f").step(
            Step::new("open-composer", locator("open-composer", "a.create"), StepAction::Click)
                .on_not_found(FallbackAction::Navigate {
                    url: "https://example.test/create/".into(),
                }),
        );
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();

        assert!(result.is_completed());
        let step = &result.step_results[0];
        assert!(step.fallback_used);
        assert!(step.transitions.contains(&StepState::FallbackNavigating));
        assert!(page
            .journal()
            .contains(&JournalEntry::Click { node: create }));
    }

    #[tokio::test(start_paused = true)]
    async fn action_failure_consumes_retry_budget() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        page.add(MemoryNode::new("button").selector("button.flaky").failing_clicks(1));
        page.add(MemoryNode::new("button").selector("button.broken").failing_clicks(5));

        let flow = Flow::new("f", "f")
            .step(Step::new("flaky", locator("flaky", "button.flaky"), StepAction::Click).retries(1))
            .step(Step::new("broken", locator("broken", "button.broken"), StepAction::Click).retries(2));
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();

        assert_eq!(result.step_results[0].retry_attempts, 1);
        assert!(result.step_results[0].success);
        match &result.outcome {
            FlowOutcome::Aborted { step, kind, .. } => {
                assert_eq!(step, "broken");
                assert_eq!(*kind, ErrorKind::ActionFailed);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(result.step_results[1].retry_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_step_stops_at_first_skip() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let next = page.add(MemoryNode::new("div").selector("div.next").text("Next"));
        page.on_click(next, Effect::Hide(next));

        let flow = Flow::new("f", "f")
            .step(Step::new("advance-wizard", locator("advance-wizard", "div.next"), StepAction::Click).repeat(3));
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();

        assert!(result.is_completed());
        let names: Vec<_> = result.step_results.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(names, vec!["advance-wizard#1", "advance-wizard#2"]);
        assert!(!result.step_results[0].skipped);
        assert!(result.step_results[1].skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn mutating_step_never_acts_on_pre_mutation_handle() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let select = page.add(
            MemoryNode::new("button")
                .selector("button._aswp")
                .text("Select from computer"),
        );
        let flow = Flow::new("f", "f").step(
            Step::new("trigger-file-picker", locator("trigger-file-picker", "button._aswp"), StepAction::Click)
                .mutating(),
        );
        let mut ctx = ctx();
        let result = executor(&page).execute(&flow, &mut ctx).await.unwrap();
        assert!(result.is_completed());

        let journal = page.journal();
        assert!(!journal.contains(&JournalEntry::Click { node: select }));
        let clone = journal
            .iter()
            .find_map(|e| match e {
                JournalEntry::Replace { original, clone } if *original == select => Some(*clone),
                _ => None,
            })
            .unwrap();
        assert!(journal.contains(&JournalEntry::Click { node: clone }));
        assert!(ctx.notes.iter().any(|n| n.contains("rebound")));
    }

    #[tokio::test(start_paused = true)]
    async fn unmet_post_condition_aborts_as_verification_timeout() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        page.add(MemoryNode::new("button").selector("button.go"));
        let flow = Flow::new("f", "f").step(
            Step::new("go", locator("go", "button.go"), StepAction::Click)
                .expect(PostCondition::UrlContains("/done".into()))
                .retries(0),
        );
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();
        match result.outcome {
            FlowOutcome::Aborted { kind, .. } => assert_eq!(kind, ErrorKind::VerificationTimeout),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(result.step_results[0]
            .transitions
            .contains(&StepState::Verifying));
    }

    #[tokio::test(start_paused = true)]
    async fn post_condition_met_mid_poll_advances() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let banner = page.add(MemoryNode::new("div").selector("div.done").text("Done").hidden());
        page.add(
            MemoryNode::new("button")
                .selector("button.go")
                .on_click(Effect::ShowAfter(banner, Duration::from_secs(2))),
        );
        let flow = Flow::new("f", "f").step(
            Step::new("go", locator("go", "button.go"), StepAction::Click)
                .expect(PostCondition::Visible(CandidateStrategy::css("div.done")))
                .retries(0),
        );

        let started = Instant::now();
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();
        assert!(result.is_completed());
        assert!(started.elapsed() >= Duration::from_secs(2));
        let step = &result.step_results[0];
        assert!(step.success);
        assert_eq!(
            &step.transitions[step.transitions.len() - 2..],
            &[StepState::Verifying, StepState::Advanced]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_post_condition_holds_once_dialog_closes() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let dialog = page.add(MemoryNode::new("div").selector("div.dialog").text("Discard?"));
        page.add(
            MemoryNode::new("button")
                .selector("button.close")
                .on_click(Effect::Hide(dialog)),
        );
        let flow = Flow::new("f", "f").step(
            Step::new("close", locator("close", "button.close"), StepAction::Click)
                .expect(PostCondition::Hidden(CandidateStrategy::css("div.dialog")))
                .retries(0),
        );
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();
        assert!(result.is_completed());
        assert!(result.step_results[0].transitions.contains(&StepState::Verifying));
    }

    #[tokio::test(start_paused = true)]
    async fn page_text_post_condition_waits_for_text() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let toast = page.add(MemoryNode::new("span").text("Draft saved").hidden());
        page.add(
            MemoryNode::new("button")
                .selector("button.save")
                .on_click(Effect::ShowAfter(toast, Duration::from_secs(1))),
        );
        let flow = Flow::new("f", "f").step(
            Step::new("save", locator("save", "button.save"), StepAction::Click)
                .expect(PostCondition::PageTextContains("Draft saved".into()))
                .retries(0),
        );
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();
        assert!(result.is_completed());
        assert!(result.step_results[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn keyboard_fallback_reveals_target() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let compose = page.add(MemoryNode::new("div").selector("div.compose").detached());
        page.on_key("c", Effect::Attach(compose));

        let flow = Flow::new("f", "f").step(
            Step::new("open-composer", locator("open-composer", "div.compose"), StepAction::Click)
                .on_not_found(FallbackAction::PressKey { key: "c".into() }),
        );
        let result = executor(&page).execute(&flow, &mut ctx()).await.unwrap();

        assert!(result.is_completed());
        assert!(result.step_results[0].fallback_used);
        let journal = page.journal();
        let key = journal
            .iter()
            .position(|e| matches!(e, JournalEntry::Key { key } if key == "c"))
            .unwrap();
        let click = journal
            .iter()
            .position(|e| *e == JournalEntry::Click { node: compose })
            .unwrap();
        assert!(key < click);
    }

    #[tokio::test]
    async fn empty_flow_fails_validation() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let err = executor(&page)
            .execute(&Flow::new("f", "f"), &mut ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ValidationFailed(_)));
    }
}
