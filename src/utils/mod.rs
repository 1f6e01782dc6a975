//!
//! Utility module for the confirmation tracker.
//!
//! Re-exports formatting helpers used in log lines and status output.
/// Formatting helpers for identifiers and progress
pub mod format;

pub use format::{format_progress, truncate_id};
