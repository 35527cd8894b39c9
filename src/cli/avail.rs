//! `velocity avail`: list images and their versions.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::config::VelocityConfig;
use crate::specification::{DirectorySpecStore, SpecStore, TargetSettings};

/// List every image on the image path with the versions available under the current
/// settings, lowest first.
#[derive(Args, Debug)]
pub struct AvailCommand {
    /// Also list versions hidden by `when` guards
    #[arg(long)]
    all: bool,
}

impl AvailCommand {
    pub fn execute(self, config: &VelocityConfig) -> Result<()> {
        let store = DirectorySpecStore::new(config.image_path.clone());
        let listing = self.listing(&store, &config.target_settings());
        if listing.is_empty() {
            println!("No images found in {}", display_roots(&store));
            return Ok(());
        }

        println!("{}", "==> Available images".bold());
        for (name, versions) in listing {
            if versions.is_empty() {
                println!("    {} {}", name.cyan(), "(no versions for these settings)".dimmed());
            } else {
                println!("    {} {}", name.cyan(), versions.join(" "));
            }
        }
        Ok(())
    }

    /// `(image, versions)` rows, sorted by name; images that fail to load are skipped.
    fn listing(&self, store: &dyn SpecStore, settings: &TargetSettings) -> Vec<(String, Vec<String>)> {
        let mut rows = Vec::new();
        for name in store.names() {
            let spec = match store.load(&name) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!("Skipping '{name}': {e}");
                    continue;
                }
            };
            let mut versions = if self.all {
                spec.all_versions()
            } else {
                spec.available_versions(settings)
            };
            versions.sort();
            rows.push((name, versions.iter().map(ToString::to_string).collect()));
        }
        rows
    }
}

fn display_roots(store: &DirectorySpecStore) -> String {
    store.roots().iter().map(|r| r.display().to_string()).collect::<Vec<_>>().join(":")
}
