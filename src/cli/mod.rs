//! Command-line interface for Velocity.
//!
//! # Commands
//!
//! - `build` - resolve a target, render and assemble its build chain, run the backend
//! - `avail` - list images and the versions available for the current settings
//! - `spec` - show the resolved build chain of a target as a tree
//!
//! # Global options
//!
//! - `--debug <LEVEL>` - log level (`error`, `warn`, `info`, `debug`, `trace`)
//! - `--backend`, `--system`, `--distro` - target settings
//! - `--policy` - version selection policy (`highest`, `most-recently-declared`)
//!
//! # Example
//!
//! ```bash
//! velocity avail
//! velocity spec gcc@13:
//! velocity --backend podman build gcc@13 --arg BUILD_TYPE=debug --dry-run
//! ```

mod avail;
mod build;
mod spec;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{SettingOverrides, VelocityConfig};
use crate::core::VelocityError;
use crate::resolver::{BuildChain, Resolver, ShellPrologRunner, parse_target};
use crate::specification::{DirectorySpecStore, SpecStore};

/// Main CLI structure for Velocity.
#[derive(Parser, Debug)]
#[command(
    name = "velocity",
    about = "Velocity - build layered container images from specifications and VTMP templates",
    version,
    long_about = "Velocity resolves an image and its dependencies into a build chain, renders each \
                  image's VTMP template for the selected backend and builds the images in order."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level for diagnostic output
    #[arg(long, global = true, value_name = "LEVEL")]
    debug: Option<String>,

    /// Container backend (apptainer, singularity, docker, podman)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Target system name
    #[arg(long, global = true)]
    system: Option<String>,

    /// Target distro
    #[arg(long, global = true)]
    distro: Option<String>,

    /// Version selection policy (highest, most-recently-declared)
    #[arg(long, global = true)]
    policy: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an image and its dependencies
    Build(build::BuildCommand),

    /// List available images and versions
    Avail(avail::AvailCommand),

    /// Show the resolved build chain of a target
    Spec(spec::SpecCommand),
}

impl Cli {
    /// Run the selected command.
    ///
    /// # Errors
    ///
    /// Any configuration, resolution, template, staging or backend error.
    pub async fn execute(self) -> Result<()> {
        let mut config = VelocityConfig::load().context("Failed to load configuration")?;
        init_logging(self.debug.as_deref(), config.logging_level.as_deref());
        config.apply_overrides(&self.overrides())?;

        match self.command {
            Commands::Build(cmd) => cmd.execute(config).await,
            Commands::Avail(cmd) => cmd.execute(&config),
            Commands::Spec(cmd) => cmd.execute(config),
        }
    }

    fn overrides(&self) -> SettingOverrides {
        SettingOverrides {
            backend: self.backend.clone(),
            distro: self.distro.clone(),
            system: self.system.clone(),
            arch: None,
            policy: self.policy.clone(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `--debug` wins over `RUST_LOG`, which wins over the configured level; the fallback is
/// `warn`.
fn init_logging(flag: Option<&str>, configured: Option<&str>) {
    let filter = if let Some(level) = flag {
        EnvFilter::new(level)
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        EnvFilter::new(configured.unwrap_or("warn"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).try_init();
}

/// Resolve `target` against the configured image path.
///
/// The root image's `config:` block is applied to `config` before resolution.
fn resolve_target(
    target: &str,
    config: &mut VelocityConfig,
    arguments: Vec<(String, String)>,
) -> Result<BuildChain> {
    let store = DirectorySpecStore::new(config.image_path.clone());
    let (name, constraint) = parse_target(target)?;
    let root = store.load(&name)?;
    config.apply_spec_config(&root.config)?;

    let runner = ShellPrologRunner;
    let options = config.resolve_options(arguments);
    Resolver::new(&store, &runner, options)
        .resolve_root(root, constraint)
        .with_context(|| format!("Failed to resolve build target '{target}'"))
}

/// Parse a `NAME=VALUE` pair from `--arg`.
fn parse_key_value(input: &str) -> Result<(String, String), VelocityError> {
    match input.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(VelocityError::ConfigError {
            message: format!("expected NAME=VALUE, got '{input}'"),
        }),
    }
}
