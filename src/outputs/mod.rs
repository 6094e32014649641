//! Output generation for the CLI and for external monitoring.
//!
//! # Submodules
//!
//! - [`console`]: plain-text tables for status, search results, topics,
//!   sources and discovery suggestions
//! - [`json`]: the `status.json` file rewritten on every status check

pub mod console;
pub mod json;
