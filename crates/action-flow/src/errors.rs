//! Flow execution error types

use action_locator::LocatorError;
use action_primitives::{ActionError, BindError};
use thiserror::Error;

use crate::types::ErrorKind;

/// Flow execution errors
#[derive(Debug, Error, Clone)]
pub enum FlowError {
    /// Flow validation failed
    #[error("Flow validation failed: {0}")]
    ValidationFailed(String),

    /// Locator spec rejected at resolve time
    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    /// Every candidate was exhausted
    #[error("Element not found for step {0}")]
    NotFound(String),

    /// Action primitive error
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    /// Binder could not recover a fresh handle
    #[error("Bind failed: {0}")]
    Bind(#[from] BindError),

    /// Post-condition did not hold within the step timeout
    #[error("Post-condition '{condition}' not met for step {step}")]
    PostCondition { step: String, condition: String },

    /// Fallback action failed
    #[error("Fallback for step {step} failed: {reason}")]
    Fallback { step: String, reason: String },
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::NotFound(_) | FlowError::Locator(_) => ErrorKind::ElementNotFound,
            FlowError::Bind(BindError::Stale(_)) => ErrorKind::StaleElementReference,
            FlowError::PostCondition { .. } => ErrorKind::VerificationTimeout,
            FlowError::ValidationFailed(_)
            | FlowError::Action(_)
            | FlowError::Bind(_)
            | FlowError::Fallback { .. } => ErrorKind::ActionFailed,
        }
    }

    /// Whether spending a unit of retry budget can help
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Action(err) => err.is_retryable(),
            FlowError::Bind(BindError::Stale(_)) => false,
            FlowError::Bind(_) | FlowError::PostCondition { .. } => true,
            _ => false,
        }
    }
}
