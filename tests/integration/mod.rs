//! Integration test suite for Velocity
//!
//! End-to-end tests that drive the library through real image repositories on disk and
//! the `velocity` binary through `assert_cmd`. No test needs a container backend: builds
//! run with `--dry-run` or stop before the backend is invoked.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: end-to-end resolution, rendering and staging scenarios
//! - **properties**: invariants of resolution and rendering checked over several inputs
//! - **cli**: the `velocity` command line

mod cli;
mod common;
mod properties;
mod scenarios;
