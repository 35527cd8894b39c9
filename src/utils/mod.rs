//! Shared utilities.
//!
//! - [`fs`] - atomic writes, recursive copies and directory cleanup for build contexts

pub mod fs;

pub use fs::{atomic_write, clear_dir, copy_path, ensure_dir};
