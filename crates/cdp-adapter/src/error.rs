use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the driver.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target element not found")]
    TargetNotFound,
    #[error("stale node reference")]
    StaleNode,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn stale(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::StaleNode).with_hint(hint)
    }

    pub fn io(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_stale(&self) -> bool {
        self.kind == AdapterErrorKind::StaleNode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hint() {
        let err = AdapterError::stale("node pf-3 detached");
        assert_eq!(err.to_string(), "stale node reference: node pf-3 detached");
        assert!(err.is_stale());
        assert!(!err.retriable);
    }

    #[test]
    fn io_errors_are_retriable() {
        let err = AdapterError::io("socket closed");
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.retriable);
    }
}
