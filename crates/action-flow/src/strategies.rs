//! Failure handling strategies

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::errors::FlowError;

/// Failure handler trait
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// Decide what to do after the `attempt`-th failure of a step
    async fn handle_failure(
        &self,
        step_id: &str,
        retry_budget: u32,
        error: &FlowError,
        attempt: u32,
    ) -> FailureHandlerResult;

    fn should_retry(&self, retry_budget: u32, error: &FlowError, attempt: u32) -> bool;

    fn calculate_backoff(&self, attempt: u32) -> Duration;
}

/// Result of failure handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureHandlerResult {
    /// Abort the entire flow
    Abort(String),

    /// Re-enter locating for the current step
    Retry { attempt: u32, backoff_ms: u64 },
}

/// Linear backoff, capped
pub struct DefaultFailureHandler {
    backoff: Duration,
    cap: Duration,
}

impl DefaultFailureHandler {
    pub fn new() -> Self {
        Self {
            backoff: Duration::from_millis(500),
            cap: Duration::from_secs(5),
        }
    }

    pub fn with_backoff(backoff: Duration) -> Self {
        Self {
            backoff,
            ..Self::new()
        }
    }
}

impl Default for DefaultFailureHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FailureHandler for DefaultFailureHandler {
    async fn handle_failure(
        &self,
        step_id: &str,
        retry_budget: u32,
        error: &FlowError,
        attempt: u32,
    ) -> FailureHandlerResult {
        if !self.should_retry(retry_budget, error, attempt) {
            warn!(
                step = step_id,
                attempt,
                retry_budget,
                %error,
                "step failed, aborting"
            );
            return FailureHandlerResult::Abort(if error.is_retryable() {
                format!("retry budget ({}) exhausted: {}", retry_budget, error)
            } else {
                error.to_string()
            });
        }

        let backoff = self.calculate_backoff(attempt);
        info!(
            step = step_id,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            %error,
            "step failed, retrying"
        );
        sleep(backoff).await;

        FailureHandlerResult::Retry {
            attempt,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    fn should_retry(&self, retry_budget: u32, error: &FlowError, attempt: u32) -> bool {
        error.is_retryable() && attempt <= retry_budget
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1)).min(self.cap)
    }
}
