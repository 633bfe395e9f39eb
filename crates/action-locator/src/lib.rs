//! Cascading element locator
//!
//! Resolves one live, interactable element from an ordered list of candidate
//! strategies:
//! - structural CSS selectors
//! - visible text matches (promoted to the nearest clickable ancestor)
//! - attribute filters compiled to CSS attribute selectors
//!
//! Each candidate waits for at most its own budget; the first candidate that
//! yields a visible, enabled, text-verified node wins.

pub mod errors;
pub mod resolver;
pub mod strategies;
pub mod types;

pub use errors::*;
pub use resolver::*;
pub use strategies::*;
pub use types::*;
