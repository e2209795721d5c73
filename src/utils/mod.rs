//! Shared utilities
//!
//! Filesystem helpers used by the synchronizer and the compression engine.

pub mod fs;
