//! Error types for action primitives

use action_locator::LocatorError;
use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

/// Errors raised while performing an action
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The handle no longer points at an attached node
    #[error("Stale element: {0}")]
    Stale(String),

    /// Element is hidden or disabled
    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    /// Attach-file path does not exist
    #[error("Media file missing: {0}")]
    MissingFile(String),

    /// CDP communication or protocol error
    #[error("CDP I/O error: {0}")]
    CdpIo(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    pub fn from_adapter(err: AdapterError) -> Self {
        let message = err.to_string();
        match err.kind {
            AdapterErrorKind::StaleNode | AdapterErrorKind::TargetNotFound => {
                ActionError::Stale(message)
            }
            AdapterErrorKind::CdpIo | AdapterErrorKind::NavTimeout => ActionError::CdpIo(message),
            AdapterErrorKind::Internal => ActionError::Internal(message),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ActionError::Stale(_))
    }

    /// Whether re-locating and trying again can help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActionError::MissingFile(_))
    }
}

/// Errors raised by the mutation-safe binder
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// No fresh, interactable handle could be recovered after the replacement
    #[error("Stale element reference: {0}")]
    Stale(String),

    #[error("Injected file input missing: {0}")]
    InputMissing(String),

    #[error("Driver error during bind: {0}")]
    Driver(String),

    #[error(transparent)]
    Locator(#[from] LocatorError),
}
