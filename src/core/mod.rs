//! Core types for Velocity
//!
//! This module holds the error taxonomy shared by every stage of the build pipeline
//! (resolution, template parsing, rendering, staging and backend invocation).
//!
//! # Error Management
//!
//! - **Strongly-typed errors** ([`VelocityError`]) so tests and callers can match on kind
//! - **User-friendly contexts** ([`ErrorContext`]) with actionable suggestions for CLI users
//! - **Automatic conversion** from `std::io::Error`, `serde_yaml::Error` and `serde_json::Error`
//!
//! # Examples
//!
//! ```rust,ignore
//! use velocity_cli::core::{VelocityError, user_friendly_error};
//!
//! fn resolve() -> anyhow::Result<()> {
//!     Err(VelocityError::ImageNotFound { name: "gcc".into() }.into())
//! }
//!
//! if let Err(e) = resolve() {
//!     user_friendly_error(e).display();
//! }
//! ```

pub mod error;

pub use error::{ErrorContext, VelocityError, user_friendly_error};
