//! Shared helpers for the integration tests.

use anyhow::Result;
use assert_cmd::Command;
use std::path::Path;
use velocity_cli::resolver::{BuildChain, ResolveOptions, Resolver};
use velocity_cli::test_utils::{ImageRepoFixture, ScriptedPrologRunner, test_options};

/// Template used by images whose content does not matter.
pub const SCRATCH: &str = "@from scratch\n";

/// Resolve `target` in `repo` with the default test settings.
pub fn resolve(repo: &ImageRepoFixture, target: &str) -> Result<BuildChain> {
    resolve_with(repo, test_options(&repo.build_dir()), target)
}

/// Resolve `target` in `repo` with custom options and no prologs.
pub fn resolve_with(repo: &ImageRepoFixture, options: ResolveOptions, target: &str) -> Result<BuildChain> {
    let store = repo.store();
    let runner = ScriptedPrologRunner::new();
    Ok(Resolver::new(&store, &runner, options).resolve(target)?)
}

/// `name@version` of every node, in build order.
pub fn labels(chain: &BuildChain) -> Vec<String> {
    chain.nodes.iter().map(|n| n.label()).collect()
}

/// The `velocity` binary pointed at `repo`, docker on ubuntu, system `local`.
///
/// The configuration directory is an empty directory inside the repository so the
/// user's own `~/.velocity/config.yaml` never leaks into a test.
pub fn velocity(repo: &ImageRepoFixture) -> Command {
    let config_dir = repo.root().join("config");
    std::fs::create_dir_all(&config_dir).expect("create config dir");

    let mut cmd = Command::cargo_bin("velocity").expect("velocity binary");
    cmd.current_dir(repo.root())
        .env("VELOCITY_CONFIG_DIR", &config_dir)
        .env("VELOCITY_IMAGE_PATH", repo.images_dir())
        .env("VELOCITY_BUILD_DIR", repo.build_dir())
        .env("VELOCITY_BACKEND", "docker")
        .env("VELOCITY_SYSTEM", "local")
        .env("VELOCITY_DISTRO", "ubuntu")
        .env("VELOCITY_ARCH", "x86_64")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("VELOCITY_LOGGING_LEVEL");
    cmd
}

/// Names of the entries directly under `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect())
        .unwrap_or_default();
    names.sort();
    names
}
