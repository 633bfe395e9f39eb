//! Action executor

use std::sync::Arc;
use std::time::Instant;

use action_locator::ElementHandle;
use async_trait::async_trait;
use cdp_adapter::Cdp;
use chrono::Utc;
use tracing::{debug, info};

use crate::{
    errors::ActionError,
    types::{Action, ActionReport},
    waiting::{FixedSettle, WaitStrategy},
};

/// Action executor trait
///
/// Each call:
/// - re-inspects the handle (stale or non-interactable handles are rejected)
/// - performs the action through the driver
/// - settles for a fixed interval before returning
#[async_trait]
pub trait ActionPrimitives: Send + Sync {
    async fn act(&self, handle: &ElementHandle, action: &Action)
        -> Result<ActionReport, ActionError>;
}

/// Default action executor
pub struct DefaultActionPrimitives {
    page: Arc<dyn Cdp>,
    wait_strategy: Arc<dyn WaitStrategy>,
}

impl DefaultActionPrimitives {
    pub fn new(page: Arc<dyn Cdp>) -> Self {
        Self {
            page,
            wait_strategy: Arc::new(FixedSettle::default()),
        }
    }

    pub fn with_wait_strategy(mut self, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }

    async fn precheck(&self, handle: &ElementHandle, action: &Action) -> Result<(), ActionError> {
        let state = self
            .page
            .inspect(handle.node())
            .await
            .map_err(ActionError::from_adapter)?;

        // Injected file inputs are hidden on purpose.
        let ok = if state.is_file_input() {
            state.enabled
        } else {
            state.is_interactable()
        };
        if !ok {
            return Err(ActionError::NotInteractable(format!(
                "{} on <{}> {} (visible={}, enabled={})",
                action.name(),
                state.tag,
                handle.node(),
                state.visible,
                state.enabled
            )));
        }

        if let Action::AttachFile { path } = action {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(ActionError::MissingFile(path.display().to_string()));
            }
        }
        Ok(())
    }

    async fn perform(&self, handle: &ElementHandle, action: &Action) -> Result<(), ActionError> {
        let node = handle.node();
        let result = match action {
            Action::Click => self.page.click(node).await,
            Action::SetText { text } => {
                self.page
                    .clear_text(node)
                    .await
                    .map_err(ActionError::from_adapter)?;
                self.page.type_text(node, text).await
            }
            Action::AttachFile { path } => {
                self.page
                    .set_input_files(node, std::slice::from_ref(path))
                    .await
            }
            Action::PressKey { key } => self.page.press_key(key).await,
        };
        result.map_err(ActionError::from_adapter)
    }
}

#[async_trait]
impl ActionPrimitives for DefaultActionPrimitives {
    async fn act(
        &self,
        handle: &ElementHandle,
        action: &Action,
    ) -> Result<ActionReport, ActionError> {
        let started_at = Utc::now();
        let start_instant = Instant::now();
        debug!(action = action.name(), node = %handle.node(), "executing action");

        self.precheck(handle, action).await?;
        self.perform(handle, action).await?;
        let settled = self.wait_strategy.settle(action).await;

        let latency_ms = start_instant.elapsed().as_millis() as u64;
        info!(
            action = action.name(),
            node = %handle.node(),
            latency_ms,
            "action completed"
        );
        Ok(ActionReport::success(
            action,
            handle.node().to_string(),
            started_at,
            latency_ms,
            settled.as_millis() as u64,
        ))
    }
}
