//! Post-action settle waits

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::types::Action;

/// Waiting strategy trait
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    /// Pause after `action`; returns how long it waited.
    async fn settle(&self, action: &Action) -> Duration;
}

/// Fixed, bounded pause after every action. Not a poll.
#[derive(Debug, Clone)]
pub struct FixedSettle {
    pub default: Duration,
    pub attach_file: Duration,
}

impl Default for FixedSettle {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(2),
            attach_file: Duration::from_secs(5),
        }
    }
}

impl FixedSettle {
    pub fn uniform(pause: Duration) -> Self {
        Self {
            default: pause,
            attach_file: pause,
        }
    }

    pub fn interval_for(&self, action: &Action) -> Duration {
        match action {
            Action::AttachFile { .. } => self.attach_file,
            _ => self.default,
        }
    }
}

#[async_trait]
impl WaitStrategy for FixedSettle {
    async fn settle(&self, action: &Action) -> Duration {
        let pause = self.interval_for(action);
        if !pause.is_zero() {
            debug!(action = action.name(), settle_ms = pause.as_millis() as u64, "settling");
            tokio::time::sleep(pause).await;
        }
        pause
    }
}
