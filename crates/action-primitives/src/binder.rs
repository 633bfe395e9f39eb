//! Mutation-safe binder
//!
//! Neutralising a control's own click behaviour means cloning it and replacing
//! the original. Any handle obtained before the replacement points at a
//! detached node, so the binder consumes it and hands back freshly resolved
//! handles only.

use std::sync::Arc;
use std::time::Duration;

use action_locator::{CandidateStrategy, ElementHandle, ElementResolver, LocatorSpec, Resolution};
use cdp_adapter::{Cdp, CloneRebind, FileInputSpec, BOUND_MARKER_ATTR};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::BindError;

pub const INJECTED_INPUT_ID: &str = "postflow-injected-file-input";

pub const MEDIA_ACCEPT: &str =
    "video/mp4,video/quicktime,image/jpeg,image/png,image/heic,image/heif";

/// Fresh handles for a control after it has been rebound to the injected input.
#[derive(Debug)]
pub struct BoundControl {
    /// The marked clone that replaced the original control
    pub trigger: ElementHandle,
    /// The hidden file input the clone forwards to
    pub file_input: ElementHandle,
    pub marker: String,
}

pub struct MutationSafeBinder {
    page: Arc<dyn Cdp>,
    resolver: Arc<dyn ElementResolver>,
    input: FileInputSpec,
}

impl MutationSafeBinder {
    pub fn new(page: Arc<dyn Cdp>, resolver: Arc<dyn ElementResolver>) -> Self {
        Self {
            page,
            resolver,
            input: FileInputSpec {
                id: INJECTED_INPUT_ID.to_string(),
                accept: MEDIA_ACCEPT.to_string(),
            },
        }
    }

    pub fn with_input(mut self, input: FileInputSpec) -> Self {
        self.input = input;
        self
    }

    pub fn input_id(&self) -> &str {
        &self.input.id
    }

    /// Locator for the injected input; it is hidden, so visibility is not required.
    pub fn input_locator(&self) -> LocatorSpec {
        LocatorSpec::new("injected-file-input")
            .candidate(CandidateStrategy::css(format!("#{}", self.input.id)))
            .candidate_budget(Duration::from_secs(2))
            .step_timeout(Duration::from_secs(2))
            .allow_hidden()
    }

    /// Inject the file input, replace `original` with a marked clone, and
    /// re-resolve both through `spec`.
    pub async fn bind_and_recover(
        &self,
        original: ElementHandle,
        spec: &LocatorSpec,
    ) -> Result<BoundControl, BindError> {
        self.page
            .inject_file_input(&self.input)
            .await
            .map_err(|err| BindError::Driver(err.to_string()))?;

        let marker = Uuid::new_v4().simple().to_string();
        let rebind = CloneRebind {
            marker: marker.clone(),
            forward_to: self.input.id.clone(),
        };
        let stale_node = original.node().clone();
        self.page
            .replace_with_clone(original.node(), &rebind)
            .await
            .map_err(|err| {
                if err.is_stale() {
                    BindError::Stale(format!(
                        "{} detached before it could be cloned",
                        stale_node
                    ))
                } else {
                    BindError::Driver(err.to_string())
                }
            })?;
        drop(original);

        let marked = spec.with_leading(
            CandidateStrategy::css(format!("[{}=\"{}\"]", BOUND_MARKER_ATTR, marker))
                .with_budget(spec.candidate_budget),
        );
        let trigger = match self.resolver.resolve(&marked).await? {
            Resolution::Found { handle, .. } => handle,
            Resolution::NotFound { .. } => {
                return Err(BindError::Stale(format!(
                    "no live control for '{}' after replacement",
                    spec.name
                )))
            }
        };

        if trigger.node() == &stale_node {
            return Err(BindError::Stale(format!(
                "re-resolution of '{}' returned the replaced node {}",
                spec.name, stale_node
            )));
        }
        if !trigger.is_interactable() {
            return Err(BindError::Stale(format!(
                "rebound control {} is not interactable",
                trigger.node()
            )));
        }
        if trigger.marker() != Some(marker.as_str()) {
            warn!(
                step = %spec.name,
                node = %trigger.node(),
                "re-resolved control does not carry the bind marker"
            );
        }

        let file_input = self
            .resolver
            .resolve(&self.input_locator())
            .await?
            .into_handle()
            .ok_or_else(|| BindError::InputMissing(format!("#{}", self.input.id)))?;

        info!(
            step = %spec.name,
            replaced = %stale_node,
            trigger = %trigger.node(),
            input = %file_input.node(),
            %marker,
            "control rebound to injected file input"
        );
        Ok(BoundControl {
            trigger,
            file_input,
            marker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_locator::DefaultElementResolver;
    use cdp_adapter::{Effect, JournalEntry, MemoryNode, MemoryPage};

    fn select_spec() -> LocatorSpec {
        LocatorSpec::new("trigger-file-picker")
            .candidate(CandidateStrategy::css("button._aswp").requiring("Select"))
            .candidate_budget(Duration::from_secs(3))
    }

    fn binder(page: &Arc<MemoryPage>) -> (MutationSafeBinder, Arc<dyn ElementResolver>) {
        let cdp = page.clone() as Arc<dyn Cdp>;
        let resolver: Arc<dyn ElementResolver> =
            Arc::new(DefaultElementResolver::new(cdp.clone()));
        (MutationSafeBinder::new(cdp, resolver.clone()), resolver)
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_returns_a_fresh_marked_handle() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let original = page.add(
            MemoryNode::new("button")
                .selector("button._aswp")
                .text("Select from computer"),
        );
        let (binder, resolver) = binder(&page);

        let handle = resolver
            .resolve(&select_spec())
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        let pre = handle.node().clone();

        let bound = binder.bind_and_recover(handle, &select_spec()).await.unwrap();
        assert_ne!(bound.trigger.node(), &pre);
        assert_eq!(bound.trigger.marker(), Some(bound.marker.as_str()));
        assert!(bound.trigger.is_interactable());
        assert!(!page.is_attached(original));
        assert_eq!(page.node_by_id(INJECTED_INPUT_ID), page.key_of(bound.file_input.node()));

        // Binding again consumes the first trigger and yields yet another node.
        let first = bound.trigger.node().clone();
        let again = binder
            .bind_and_recover(bound.trigger, &select_spec())
            .await
            .unwrap();
        assert_ne!(again.trigger.node(), &first);
        assert_ne!(again.trigger.node(), &pre);
        assert!(again.trigger.is_interactable());
        assert_eq!(
            page.journal()
                .iter()
                .filter(|e| matches!(e, JournalEntry::Inject { .. }))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn original_detached_before_clone_is_stale() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let original = page.add(
            MemoryNode::new("button")
                .selector("button._aswp")
                .text("Select from computer"),
        );
        page.on_inject(Effect::Detach(original));
        let (binder, resolver) = binder(&page);

        let handle = resolver
            .resolve(&select_spec())
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        let err = binder
            .bind_and_recover(handle, &select_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::Stale(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_clone_is_rejected() {
        let page = Arc::new(MemoryPage::new("https://example.test/"));
        let original = page.add(
            MemoryNode::new("button")
                .selector("button._aswp")
                .text("Select from computer"),
        );
        let (binder, resolver) = binder(&page);
        let handle = resolver
            .resolve(&select_spec())
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        // Collapse the composer right after injection so the clone inherits a hidden node.
        page.on_inject(Effect::Hide(original));
        let err = binder
            .bind_and_recover(handle, &select_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::Stale(_)));
    }
}
