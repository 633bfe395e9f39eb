//! Errors raised by the run's external collaborators

use action_flow::ErrorKind;
use cdp_adapter::AdapterError;
use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("media unavailable: {0}")]
    Media(String),

    #[error("session unavailable: {0}")]
    Session(String),

    #[error("browser driver failed: {0}")]
    Driver(#[from] AdapterError),

    #[error("diagnostics I/O failed: {0}")]
    Diagnostics(#[from] std::io::Error),
}

impl RunError {
    pub fn media(reason: impl Into<String>) -> Self {
        Self::Media(reason.into())
    }

    pub fn session(reason: impl Into<String>) -> Self {
        Self::Session(reason.into())
    }

    /// Every collaborator failure surfaces as an external resource error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalResourceError
    }
}
