//! Velocity - layered container image builds
//!
//! Velocity builds container images out of small, composable image specifications. Each
//! image lives in its own directory with a `specs.yaml` (versions, dependencies,
//! arguments, variables, prolog) and a VTMP template (backend-native build script text
//! interleaved with `@` directives). A build resolves a target such as `gcc@13` into a
//! build chain of images layered on one another, renders every template against its
//! node's variables and builds the images in order with Apptainer, Singularity, Docker
//! or Podman.
//!
//! # Pipeline
//!
//! ```text
//! target ──resolver──▶ BuildChain ──templating──▶ BuildScript ──backend──▶ script
//!                           │                                                │
//!                      variables                                   build::assemble
//!                                                                         │
//!                                                               build context ──▶ backend build
//! ```
//!
//! # Modules
//!
//! ## Core
//! - [`core`] - error taxonomy and user-facing error reporting
//! - [`constants`] - file names and environment variable names
//! - [`version`] - concrete versions, constraints and selection policies
//!
//! ## Resolution
//! - [`specification`] - `specs.yaml` parsing, selectors and spec stores
//! - [`variables`] - layered variable store and built-in variables
//! - [`resolver`] - fixed-point version resolution and per-node variable layering
//!
//! ## Rendering and building
//! - [`templating`] - VTMP parser and renderer
//! - [`backend`] - Dockerfile / definition file formatting and backend processes
//! - [`build`] - build context assembly and the build driver
//!
//! ## Application
//! - [`config`] - configuration file, environment and flag layering
//! - [`cli`] - the `velocity` command line
//! - [`utils`] - file system helpers
//!
//! # Image repository layout
//!
//! ```text
//! ~/.velocity/images/
//! ├── gcc/
//! │   ├── specs.yaml
//! │   ├── templates/default.vtmp
//! │   └── files/
//! └── ubuntu/
//!     ├── specs.yaml
//!     └── templates/default.vtmp
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use velocity_cli::build::{BuildOptions, build};
//! use velocity_cli::config::VelocityConfig;
//! use velocity_cli::resolver::{Resolver, ShellPrologRunner};
//! use velocity_cli::specification::DirectorySpecStore;
//!
//! let config = VelocityConfig::load()?;
//! let store = DirectorySpecStore::new(config.image_path.clone());
//! let chain = Resolver::new(&store, &ShellPrologRunner, config.resolve_options(vec![])).resolve("gcc@13")?;
//! let report = build(&chain, &config.build_dir, &BuildOptions::dry_run()).await?;
//! ```

pub mod backend;
pub mod build;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod resolver;
pub mod specification;
pub mod templating;
pub mod utils;
pub mod variables;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use core::{ErrorContext, VelocityError, user_friendly_error};
