//! Test utilities for Velocity
//!
//! Helpers shared by unit tests and the integration test target (enabled there through
//! the `test-utils` feature):
//! - [`init_test_logging`] - one-time tracing setup with the test writer
//! - [`ImageRepoFixture`] - an image repository on disk in a temporary directory
//! - [`ScriptedPrologRunner`] - a [`PrologRunner`](crate::resolver::PrologRunner) that
//!   returns canned output instead of running shell scripts
//!
//! # Example
//!
//! ```rust,ignore
//! use velocity_cli::test_utils::{ImageRepoFixture, ScriptedPrologRunner, test_options};
//!
//! let repo = ImageRepoFixture::new()?
//!     .image("base", "versions: [{ spec: '1' }]", "@from scratch\n")?;
//! let store = repo.store();
//! let runner = ScriptedPrologRunner::new();
//! let resolver = Resolver::new(&store, &runner, test_options(repo.build_dir()));
//! let chain = resolver.resolve("base")?;
//! ```

pub mod fixtures;
pub mod prolog;

pub use fixtures::{ImageRepoFixture, test_options, test_settings};
pub use prolog::ScriptedPrologRunner;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=velocity_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
