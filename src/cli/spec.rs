//! `velocity spec`: show how a target resolves.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::config::VelocityConfig;

use super::{parse_key_value, resolve_target};

/// Print the resolved dependency tree of a target with versions and image ids.
///
/// Resolution runs exactly as for `build`, prologs included, but nothing is written.
#[derive(Args, Debug)]
pub struct SpecCommand {
    /// Image to resolve, optionally with a version constraint
    target: String,

    /// Set a variable for every image in the chain; may be repeated
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    arguments: Vec<(String, String)>,
}

impl SpecCommand {
    pub fn execute(self, mut config: VelocityConfig) -> Result<()> {
        let chain = resolve_target(&self.target, &mut config, self.arguments)?;

        println!(
            "{} {} {}",
            "==>".bold(),
            self.target.bold(),
            format!("({} on {}/{})", config.backend, config.system, config.distro).dimmed()
        );
        print!("{}", chain.to_tree_string());
        Ok(())
    }
}
