//! Core types for action primitives

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed interaction with one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Click,

    /// Clear existing content, then type `text`
    SetText { text: String },

    /// Associate a local file with a file-accepting control
    AttachFile { path: PathBuf },

    PressKey { key: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::SetText { .. } => "set_text",
            Action::AttachFile { .. } => "attach_file",
            Action::PressKey { .. } => "press_key",
        }
    }
}

/// Action execution report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    /// Whether the action succeeded
    pub ok: bool,

    pub action: String,

    /// Node the action was performed on
    pub node: String,

    /// When the action started
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    /// When the action (including settle) finished
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,

    /// Total latency in milliseconds, settle included
    pub latency_ms: u64,

    pub settle_ms: u64,

    /// Error details (if failed)
    pub error: Option<String>,
}

impl ActionReport {
    pub fn success(
        action: &Action,
        node: impl Into<String>,
        started_at: DateTime<Utc>,
        latency_ms: u64,
        settle_ms: u64,
    ) -> Self {
        Self {
            ok: true,
            action: action.name().to_string(),
            node: node.into(),
            started_at,
            finished_at: Utc::now(),
            latency_ms,
            settle_ms,
            error: None,
        }
    }
}
