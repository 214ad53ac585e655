//! JSON serialization and parsing over live runtime values
//!
//! Both directions run on explicit stacks, so container nesting is bounded by
//! the configured depth limits rather than by the native call stack.

pub mod parse;
pub mod stringify;
pub mod walker;

pub use parse::parse;
pub use stringify::{Stringifier, stringify};
pub use walker::{WalkerState, walk};
