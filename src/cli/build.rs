//! `velocity build`: resolve, render, assemble and build a target.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::build::{BuildOptions, build};
use crate::config::VelocityConfig;

use super::{parse_key_value, resolve_target};

/// Build an image together with every image it depends on.
///
/// # Examples
///
/// ```bash
/// velocity build gcc@13
/// velocity build mpich --arg DEVICE=ch4 --name mpich-test
/// velocity build openmpi --dry-run      # stop after writing the build contexts
/// ```
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Image to build, optionally with a version constraint (`gcc`, `gcc@13`, `gcc@12:13`)
    target: String,

    /// Name of the final image (default: derived from the chain and settings)
    #[arg(short, long)]
    name: Option<String>,

    /// Set a variable for every image in the chain; may be repeated
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    arguments: Vec<(String, String)>,

    /// Write the build contexts without running the backend
    #[arg(long)]
    dry_run: bool,

    /// Empty the build directory first
    #[arg(short, long)]
    clean: bool,

    /// Show backend output while building
    #[arg(short, long)]
    verbose: bool,
}

impl BuildCommand {
    pub async fn execute(self, mut config: VelocityConfig) -> Result<()> {
        let chain = resolve_target(&self.target, &mut config, self.arguments)?;

        println!("{}", "==> Build chain".bold());
        for node in &chain.nodes {
            println!("    {} {}", node.label().cyan(), format!("({})", node.tag).dimmed());
        }

        let options = BuildOptions {
            name: self.name,
            dry_run: self.dry_run,
            clean: self.clean,
            verbose: self.verbose,
            output_dir: std::env::current_dir().context("Failed to determine the current directory")?,
        };
        let report = build(&chain, &config.build_dir, &options).await?;

        if !report.built {
            println!("{} Build contexts written to {}", "✓".green(), config.build_dir.display());
            for context in &report.contexts {
                println!("    {}", context.script_path().display());
            }
            return Ok(());
        }

        match &report.artifact {
            Some(path) => println!("{} Built {}", "✓".green(), path.display().to_string().bold()),
            None => println!("{} Built {}", "✓".green(), report.final_name.bold()),
        }
        Ok(())
    }
}
