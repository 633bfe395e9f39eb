//! The publishing workflow
//!
//! Home → Create → attach media → Next (×2) → caption → Share, then a
//! completion check. Candidate lists run from the most specific match to the
//! loosest; every loose structural candidate carries the text it must show.

use std::time::Duration;

use action_flow::{
    CompletionSignals, FallbackAction, Flow, Signal, Step, StepAction,
};
use action_locator::{CandidateStrategy, LocatorSpec};

use crate::config::Config;

pub const FLOW_ID: &str = "publish-post";

fn spec(name: &str, candidate_budget: Duration, step_timeout: Duration) -> LocatorSpec {
    LocatorSpec::new(name)
        .candidate_budget(candidate_budget)
        .step_timeout(step_timeout)
}

fn open_composer(cfg: &Config) -> Step {
    let locator = spec("open-composer", Duration::from_secs(3), Duration::from_secs(20))
        .candidate(CandidateStrategy::text("Create"))
        .candidate(CandidateStrategy::css(r#"svg[aria-label="New post"]"#))
        .candidate(CandidateStrategy::css("span.x1lliihq").requiring("Create"))
        .candidate(CandidateStrategy::attribute("a:href*=/create").requiring("Create"));
    Step::new("open-composer", locator, StepAction::Click).on_not_found(FallbackAction::Navigate {
        url: cfg.composer_url.clone(),
    })
}

fn attach_media() -> Step {
    let locator = spec("attach-media", Duration::from_secs(5), Duration::from_secs(40))
        .candidate(CandidateStrategy::text("Select from computer"))
        .candidate(
            CandidateStrategy::css("button._aswp._aswr._aswu._asw_._asx2")
                .requiring("Select from computer"),
        )
        .candidate(CandidateStrategy::attribute("button:type=button").requiring("Select from computer"))
        .candidate(CandidateStrategy::css("button._aswp").requiring("Select"));
    Step::new("attach-media", locator, StepAction::AttachMedia).mutating()
}

fn next() -> Step {
    let locator = spec("next", Duration::from_secs(5), Duration::from_secs(25))
        .candidate(CandidateStrategy::css(r#"div[role="button"]"#).requiring("Next"))
        .candidate(CandidateStrategy::text("\"Next\""))
        .candidate(CandidateStrategy::css("div.x1i10hfl.xjqpnuy").requiring("Next"))
        .candidate(CandidateStrategy::attribute("div:role=button&tabindex=0").requiring("Next"));
    Step::new("next", locator, StepAction::Click)
        .optional()
        .repeat(2)
}

fn caption() -> Step {
    let locator = spec("caption", Duration::from_secs(5), Duration::from_secs(30))
        .candidate(CandidateStrategy::css(r#"div[aria-label="Write a caption..."]"#))
        .candidate(CandidateStrategy::attribute("div:contenteditable=true&aria-label*=caption"))
        .candidate(CandidateStrategy::css(r#"div[contenteditable="true"][role="textbox"]"#))
        .candidate(CandidateStrategy::css(r#"div[data-lexical-editor="true"]"#))
        .candidate(CandidateStrategy::css(r#"div[contenteditable="true"]"#));
    Step::new("caption", locator, StepAction::EnterCaption).optional()
}

fn share() -> Step {
    let locator = spec("share", Duration::from_secs(5), Duration::from_secs(30))
        .candidate(CandidateStrategy::css(r#"div[role="button"]"#).requiring("Share"))
        .candidate(CandidateStrategy::text("\"Share\""))
        .candidate(CandidateStrategy::css("div.x1i10hfl.xjqpnuy").requiring("Share"))
        .candidate(CandidateStrategy::css("button").requiring("Share"));
    Step::new("share", locator, StepAction::Click).retries(2)
}

/// The full publishing flow for `cfg`'s URLs.
pub fn publish_flow(cfg: &Config) -> Flow {
    Flow::new(FLOW_ID, "Publish a post")
        .step(Step::navigate("open-home", cfg.entry_url.clone(), Duration::from_secs(60)))
        .step(open_composer(cfg))
        .step(attach_media())
        .step(next())
        .step(caption())
        .step(share())
}

pub fn completion_signals() -> CompletionSignals {
    CompletionSignals {
        positive: vec![
            Signal::Text("Your post has been shared".into()),
            Signal::Text("Your reel has been shared".into()),
            Signal::Element(CandidateStrategy::css(r#"img[alt="Animated checkmark"]"#)),
        ],
        negative: vec![
            Signal::Text("couldn't be shared".into()),
            Signal::Text("could not be shared".into()),
            Signal::Text("Something went wrong".into()),
        ],
        weak_hints: vec!["shared".into()],
    }
}
