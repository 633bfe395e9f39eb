//! Step state machine and completion verifier
//!
//! A [`Flow`] is a static, ordered list of [`Step`]s. Each step is located,
//! acted upon (through the mutation-safe binder when it rewrites the DOM) and
//! optionally verified; not-found steps may fire a fallback once, failed actions
//! consume the step's retry budget. After the terminal submit step the
//! [`CompletionVerifier`] polls for a positive or negative confirmation signal.

pub mod diagnostics;
pub mod errors;
pub mod executor;
pub mod strategies;
pub mod types;
pub mod verifier;

pub use diagnostics::{DiagnosticEvent, DiagnosticSink, EventKind, NullSink};
pub use errors::FlowError;
pub use executor::{DefaultFlowExecutor, FlowExecutor};
pub use strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult};
pub use types::*;
pub use verifier::{CompletionSignals, CompletionVerifier, Signal, Verdict};
