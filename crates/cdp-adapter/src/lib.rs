//! Page driver for postflow.
//!
//! The rest of the workspace talks to a browser page exclusively through the
//! [`Cdp`] trait. Two implementations live here:
//! - [`ChromiumPage`]: a real Chromium tab driven over the DevTools protocol
//! - [`MemoryPage`]: a scripted in-memory DOM for tests and rehearsals

pub mod chromium;
pub mod config;
pub mod dom;
pub mod error;
pub mod memory;
mod scripts;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use chromium::ChromiumPage;
pub use config::CdpConfig;
pub use dom::{CloneRebind, FileInputSpec, NodeRef, NodeState, QuerySpec, SessionCookie};
pub use error::{AdapterError, AdapterErrorKind};
pub use memory::{Effect, JournalEntry, MemoryNode, MemoryPage, NodeKey};

/// Attribute the binder stamps on a cloned control.
pub const BOUND_MARKER_ATTR: &str = "data-postflow-bound";

/// Attribute the Chromium driver uses to address nodes it has handed out.
pub const NODE_REF_ATTR: &str = "data-postflow-ref";

/// One page of a ready, authenticated browsing session.
///
/// Node references returned by [`Cdp::query`] stay valid only while the node is
/// attached. Every node-addressed call fails with [`AdapterErrorKind::StaleNode`]
/// once the node has been removed or replaced.
#[async_trait]
pub trait Cdp: Send + Sync {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), AdapterError>;

    async fn current_url(&self) -> Result<String, AdapterError>;

    /// Non-waiting snapshot of attached nodes matching `spec`, in document order.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<NodeRef>, AdapterError>;

    /// Live state of a node.
    async fn inspect(&self, node: &NodeRef) -> Result<NodeState, AdapterError>;

    async fn click(&self, node: &NodeRef) -> Result<(), AdapterError>;

    async fn clear_text(&self, node: &NodeRef) -> Result<(), AdapterError>;

    async fn type_text(&self, node: &NodeRef, text: &str) -> Result<(), AdapterError>;

    async fn set_input_files(&self, node: &NodeRef, files: &[PathBuf])
        -> Result<(), AdapterError>;

    /// Press a key on whatever currently holds keyboard focus.
    async fn press_key(&self, key: &str) -> Result<(), AdapterError>;

    /// Append a hidden file input, replacing any earlier input with the same id.
    async fn inject_file_input(&self, spec: &FileInputSpec) -> Result<NodeRef, AdapterError>;

    /// Replace `node` with a marked deep clone whose click opens the file input
    /// named in `rebind`. `node` is stale afterwards.
    async fn replace_with_clone(
        &self,
        node: &NodeRef,
        rebind: &CloneRebind,
    ) -> Result<(), AdapterError>;

    /// Visible text of the whole document.
    async fn page_text(&self) -> Result<String, AdapterError>;

    async fn screenshot(&self) -> Result<Vec<u8>, AdapterError>;

    async fn content(&self) -> Result<String, AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;
}
