//! Error types for the locator

use thiserror::Error;

/// Locator error enumeration
///
/// Driver failures while evaluating a candidate are not errors here; they are
/// recorded on the candidate attempt and the cascade moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// The locator spec itself cannot be evaluated
    #[error("Invalid locator spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// An attribute-filter expression failed to parse
    #[error("Invalid attribute filter '{0}'")]
    InvalidFilter(String),
}

impl LocatorError {
    pub fn invalid(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        LocatorError::InvalidSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}
