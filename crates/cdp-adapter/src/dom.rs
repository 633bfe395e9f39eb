//! Value types exchanged across the driver seam.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a DOM node handed out by a driver.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub String);

impl NodeRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live state of a node at the moment it was inspected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub tag: String,
    pub visible: bool,
    pub enabled: bool,
    pub text: String,
    /// Value of the binder marker attribute, when the node carries one.
    pub marker: Option<String>,
}

impl NodeState {
    pub fn is_interactable(&self) -> bool {
        self.visible && self.enabled
    }

    pub fn is_file_input(&self) -> bool {
        self.tag.eq_ignore_ascii_case("input")
    }
}

/// How a driver should select nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySpec {
    /// Plain CSS selector.
    Css { selector: String },

    /// Innermost elements whose text contains (or equals) `text`.
    Text {
        text: String,
        exact: bool,
        /// Walk up to the nearest clickable ancestor (at most five levels).
        promote_clickable: bool,
    },
}

impl QuerySpec {
    pub fn css(selector: impl Into<String>) -> Self {
        QuerySpec::Css {
            selector: selector.into(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            QuerySpec::Css { selector } => format!("css:{}", selector),
            QuerySpec::Text { text, exact, .. } => {
                if *exact {
                    format!("text:exact:'{}'", text)
                } else {
                    format!("text:partial:'{}'", text)
                }
            }
        }
    }
}

/// Hidden file input injected next to a control whose behaviour is replaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInputSpec {
    pub id: String,
    pub accept: String,
}

/// Parameters for [`crate::Cdp::replace_with_clone`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRebind {
    /// Value written to [`crate::BOUND_MARKER_ATTR`] on the clone.
    pub marker: String,
    /// Id of the file input the clone's click should open.
    pub forward_to: String,
}

/// Cookie restored into a session before the workflow starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}
