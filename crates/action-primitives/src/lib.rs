//! Action executor and mutation-safe binder
//!
//! - `act` performs one typed action (click, set-text, attach-file, press-key)
//!   against a resolved element and then settles for a fixed interval
//! - `MutationSafeBinder` wires a synthetic file input to a control by cloning
//!   and replacing it, then re-resolves a fresh handle for the clone

mod binder;
pub mod errors;
mod primitives;
pub mod types;
mod waiting;

pub use binder::*;
pub use errors::*;
pub use primitives::*;
pub use types::*;
pub use waiting::*;
