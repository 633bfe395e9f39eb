//! Postflow
//!
//! Drives a third-party web composer through a fixed publishing workflow and
//! advances a day counter only when the post is confirmed. The step engine
//! lives in the `action-*` crates; this crate wires it to its collaborators
//! (session, media, caption, ledger, diagnostics) and exposes the CLI.

pub mod caption;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod ledger;
pub mod media;
pub mod orchestrator;
pub mod session;
pub mod workflow;

pub use config::Config;
pub use errors::RunError;
pub use ledger::{LedgerError, LedgerLease, RunLedger};
pub use orchestrator::{Orchestrator, RunInputs, RunOutcome, RunSettings, RunStatus};
pub use session::{ChromiumSessions, ProvidedSession, SessionProvider};
