//! Error handling for Velocity
//!
//! This module provides the error taxonomy of the build pipeline and user-friendly
//! error reporting for the CLI. The error system follows two principles:
//! 1. **Strongly-typed errors** so callers and tests can match on the failure kind
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`VelocityError`] - Enumerated error types for every failure in the pipeline
//! - [`ErrorContext`] - Wrapper that adds details and a suggestion for display
//!
//! # Error Categories
//!
//! - **Specification**: [`VelocityError::MalformedSpec`], [`VelocityError::ImageNotFound`],
//!   [`VelocityError::InvalidTarget`], [`VelocityError::MissingArgument`]
//! - **Resolution**: [`VelocityError::CyclicDependency`],
//!   [`VelocityError::UnsatisfiableVersion`], [`VelocityError::PrologExecution`]
//! - **Templates**: [`VelocityError::UnknownDirective`], [`VelocityError::UnbalancedSection`],
//!   [`VelocityError::TemplateSyntax`], [`VelocityError::UndefinedVariable`]
//! - **Build context**: [`VelocityError::Staging`]
//! - **Backends**: [`VelocityError::BackendNotSupported`],
//!   [`VelocityError::BackendNotAvailable`], [`VelocityError::BackendFailed`]
//!
//! Every error is terminal for the current build invocation. Nothing is retried: each
//! kind points at an authoring or environment defect that a retry cannot fix.
//!
//! # Examples
//!
//! ```rust,ignore
//! use velocity_cli::core::{VelocityError, user_friendly_error};
//!
//! let error = VelocityError::CyclicDependency {
//!     chain: "gcc -> mpich -> gcc".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display(); // colored error, details and suggestion on stderr
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::templating::TemplateLocation;

/// The main error type for Velocity operations.
///
/// Variants carry enough context (image name, template location, variable name)
/// to locate the defect without re-running the build.
#[derive(Error, Debug)]
pub enum VelocityError {
    /// A specification document violates a structural rule.
    ///
    /// Raised for YAML that does not match the specification schema, duplicate
    /// dependency names, identifiers that are not alphanumeric, and version
    /// constraints that do not parse.
    #[error("Malformed specification for '{image}': {reason}")]
    MalformedSpec {
        /// Image whose specification is malformed
        image: String,
        /// What is wrong with it
        reason: String,
    },

    /// The dependency graph contains a cycle.
    ///
    /// # Fields
    /// - `chain`: The active traversal path that closed the cycle, e.g. `a -> b -> a`
    #[error("Cyclic dependency detected: {chain}")]
    CyclicDependency {
        /// Traversal path showing the cycle
        chain: String,
    },

    /// No available version satisfies every constraint placed on an image.
    #[error("No version of '{image}' satisfies {constraints}")]
    UnsatisfiableVersion {
        /// Image whose constraints cannot be met
        image: String,
        /// Rendered intersection of all constraints
        constraints: String,
        /// Why resolution failed (empty intersection, or no matching version)
        reason: String,
    },

    /// A prolog script failed.
    #[error("Prolog for '{image}' failed: {reason}")]
    PrologExecution {
        /// Image whose prolog failed
        image: String,
        /// Exit status and captured stderr
        reason: String,
    },

    /// A directive keyword outside the closed set of VTMP directives.
    #[error("Unknown directive '@{directive}' at {location}")]
    UnknownDirective {
        /// The keyword as written, without the sigil
        directive: String,
        /// Where it appeared
        location: TemplateLocation,
    },

    /// A block close without an open, or an open that is never closed.
    #[error("Unbalanced section at {location}: {reason}")]
    UnbalancedSection {
        /// Offending line
        location: TemplateLocation,
        /// Which block is unbalanced
        reason: String,
    },

    /// A directive whose arguments are structurally invalid.
    #[error("Template syntax error at {location}: {reason}")]
    TemplateSyntax {
        /// Offending line
        location: TemplateLocation,
        /// What is wrong with the directive
        reason: String,
    },

    /// A template referenced a variable that is not defined.
    ///
    /// Undefined references are never replaced by an empty string.
    #[error("Undefined variable '{variable}' at {location}")]
    UndefinedVariable {
        /// Name of the variable
        variable: String,
        /// Where it was referenced
        location: TemplateLocation,
        /// Defined names close to the requested one
        suggestions: Vec<String>,
    },

    /// The build context could not be staged.
    #[error("Staging failed for '{image}': {reason}")]
    Staging {
        /// Image whose context failed
        image: String,
        /// Missing source or colliding destination
        reason: String,
    },

    /// No specification exists for a requested image.
    #[error("Image '{name}' not found in any image path")]
    ImageNotFound {
        /// Requested image name
        name: String,
    },

    /// A build target string could not be parsed.
    #[error("Invalid build target '{target}': {reason}")]
    InvalidTarget {
        /// The target as given
        target: String,
        /// Parse failure
        reason: String,
    },

    /// A required argument has neither a default nor a command-line value.
    #[error("Argument '{argument}' of '{image}' is required but was not provided")]
    MissingArgument {
        /// Image declaring the argument
        image: String,
        /// Argument name
        argument: String,
    },

    /// The configured backend name is not one Velocity can target.
    #[error("Backend '{name}' is not supported")]
    BackendNotSupported {
        /// Configured backend name
        name: String,
    },

    /// The backend executable is not on `PATH`.
    #[error("Backend executable '{executable}' was not found in PATH")]
    BackendNotAvailable {
        /// Executable that was searched for
        executable: String,
    },

    /// The backend exited with a non-zero status.
    #[error("Backend build of '{image}' failed with status {status}")]
    BackendFailed {
        /// Image that failed to build
        image: String,
        /// Exit status (or -1 when killed by a signal)
        status: i32,
        /// Path of the build log
        log: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VelocityError {
    /// Whether this error was raised while parsing a template.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDirective { .. }
                | Self::UnbalancedSection { .. }
                | Self::TemplateSyntax { .. }
        )
    }

    /// Short machine-friendly name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSpec { .. } => "MalformedSpecError",
            Self::CyclicDependency { .. } => "CyclicDependencyError",
            Self::UnsatisfiableVersion { .. } => "UnsatisfiableVersionError",
            Self::PrologExecution { .. } => "PrologExecutionError",
            Self::UnknownDirective { .. } => "UnknownDirectiveError",
            Self::UnbalancedSection { .. } => "UnbalancedSectionError",
            Self::TemplateSyntax { .. } => "TemplateSyntaxError",
            Self::UndefinedVariable { .. } => "UndefinedVariableError",
            Self::Staging { .. } => "StagingError",
            Self::ImageNotFound { .. } => "ImageNotFoundError",
            Self::InvalidTarget { .. } => "InvalidTargetError",
            Self::MissingArgument { .. } => "MissingArgumentError",
            Self::BackendNotSupported { .. } => "BackendNotSupportedError",
            Self::BackendNotAvailable { .. } => "BackendNotAvailableError",
            Self::BackendFailed { .. } => "BackendFailedError",
            Self::ConfigError { .. } => "ConfigError",
            Self::Io(_) => "IOError",
            Self::Yaml(_) => "YamlError",
            Self::Json(_) => "JsonError",
        }
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// Details are displayed in yellow and suggestions in green so the actionable part
/// stands out from the error itself.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: VelocityError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no details or suggestion.
    #[must_use]
    pub const fn new(error: VelocityError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with actionable suggestions.
///
/// [`VelocityError`]s (also when wrapped in `anyhow` context) get tailored
/// suggestions; anything else is reported with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    let outer = error.to_string();

    match error.downcast::<VelocityError>() {
        Ok(velocity_error) => {
            let mut ctx = create_error_context(velocity_error);
            // anyhow context added on the way up is more specific than the generic details
            if ctx.error.to_string() != outer {
                ctx.details = Some(match ctx.details.take() {
                    Some(details) => format!("{outer}\n{details}"),
                    None => outer,
                });
            }
            ctx
        }
        Err(error) => {
            if let Some(io_error) = error.downcast_ref::<std::io::Error>()
                && io_error.kind() == std::io::ErrorKind::PermissionDenied
            {
                return ErrorContext::new(VelocityError::Io(std::io::Error::new(
                    io_error.kind(),
                    io_error.to_string(),
                )))
                .with_suggestion("Check ownership and permissions of the build and image directories")
                .with_details(outer);
            }

            let mut message = outer;
            if !chain.is_empty() {
                message.push_str("\n\nCaused by:");
                for (i, cause) in chain.iter().enumerate() {
                    message.push_str(&format!("\n  {}: {}", i + 1, cause));
                }
            }
            ErrorContext::new(VelocityError::ConfigError {
                message,
            })
        }
    }
}

fn create_error_context(error: VelocityError) -> ErrorContext {
    match &error {
        VelocityError::MalformedSpec { image, .. } => {
            let suggestion = format!(
                "Fix specs.yaml of '{image}': names must be alphanumeric, dependencies unique, and version constraints of the form 1.2, >=1, <=3 or 1:3"
            );
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        VelocityError::CyclicDependency { .. } => ErrorContext::new(error)
            .with_suggestion("Remove one of the dependencies on the cycle")
            .with_details("Images are layered on top of their dependencies, so the graph must be acyclic"),
        VelocityError::UnsatisfiableVersion { reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error)
                .with_suggestion("Relax one of the version constraints or add a matching version to specs.yaml")
                .with_details(details)
        }
        VelocityError::PrologExecution { .. } => ErrorContext::new(error)
            .with_suggestion("Run the prolog by hand to debug it; it must exit 0 and print KEY=VALUE lines"),
        VelocityError::UnknownDirective { .. } => ErrorContext::new(error).with_suggestion(
            "Valid directives: @from @arg @env @copy @run @label @entry @pre @post @if @else @end. Escape a literal leading '@' as '@@'",
        ),
        VelocityError::UnbalancedSection { .. } => ErrorContext::new(error)
            .with_suggestion("Every @if, @pre and @post block must be closed by exactly one @end"),
        VelocityError::UndefinedVariable { suggestions, .. } => {
            let suggestion = if suggestions.is_empty() {
                "Define the variable in specs.yaml, give the @arg a default, or pass --arg NAME=VALUE".to_string()
            } else {
                format!("Did you mean: {}?", suggestions.join(", "))
            };
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        VelocityError::Staging { .. } => ErrorContext::new(error)
            .with_suggestion("Check the @copy sources under the image's files/ directory and make every destination unique"),
        VelocityError::ImageNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'velocity avail' to list images, or add the directory to VELOCITY_IMAGE_PATH"),
        VelocityError::MissingArgument { argument, .. } => {
            let suggestion = format!("Pass --arg {argument}=VALUE");
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        VelocityError::BackendNotSupported { .. } => ErrorContext::new(error)
            .with_suggestion("Use one of: apptainer, singularity, docker, podman"),
        VelocityError::BackendNotAvailable { .. } => ErrorContext::new(error)
            .with_suggestion("Install the backend or select another one with --backend or VELOCITY_BACKEND"),
        VelocityError::BackendFailed { log, .. } => {
            let details = format!("Full backend output is in {log}");
            ErrorContext::new(error).with_details(details)
        }
        _ => ErrorContext::new(error),
    }
}
