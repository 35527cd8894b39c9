//! The build pipeline after resolution.
//!
//! Given a resolved [`BuildChain`], building runs in phases, each over the whole chain
//! before the next starts:
//!
//! 1. **Parse** every node's template
//! 2. **Render** every document against the node's variables
//! 3. **Assemble** every build context (formatted script, staged files, manifest)
//! 4. **Build** each image with the backend, dependencies first (skipped on dry runs)
//! 5. **Publish** the last image under its final name
//!
//! A template or staging defect anywhere in the chain therefore stops the build before
//! the backend is invoked for any image.
//!
//! # Example
//!
//! ```rust,ignore
//! use velocity_cli::build::{BuildOptions, build};
//!
//! let report = build(&chain, &build_dir, &BuildOptions::dry_run()).await?;
//! println!("{}", report.contexts[0].script_path().display());
//! ```

pub mod context;
pub mod manifest;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::core::VelocityError;
use crate::resolver::BuildChain;
use crate::templating::{BuildScript, parse, render};
use crate::utils::fs::{clear_dir, copy_path, ensure_dir};

pub use context::{BuildContext, assemble};
pub use manifest::BuildManifest;

/// How to run a build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Final image name; defaults to [`BuildChain::default_tag`]
    pub name: Option<String>,
    /// Stop after assembling the build contexts
    pub dry_run: bool,
    /// Empty the build directory first
    pub clean: bool,
    /// Echo backend output
    pub verbose: bool,
    /// Where file-based backends place the final image
    pub output_dir: PathBuf,
}

impl BuildOptions {
    /// Options that assemble contexts without invoking a backend.
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// One chain node ready for the backend.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub context: BuildContext,
    pub script: BuildScript,
    /// Backend-native script text
    pub formatted: String,
}

/// Outcome of [`build`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// One context per chain node, in build order
    pub contexts: Vec<BuildContext>,
    pub final_name: String,
    /// Whether the backend ran
    pub built: bool,
    /// Final `.sif` for file-based backends
    pub artifact: Option<PathBuf>,
}

/// Parse, render and assemble every node of `chain` under `build_dir`.
///
/// # Errors
///
/// The first template error (with image and template attached) or staging error.
pub fn prepare(chain: &BuildChain, build_dir: &Path) -> Result<Vec<PreparedImage>, VelocityError> {
    let mut documents = Vec::with_capacity(chain.len());
    for node in &chain.nodes {
        let document =
            parse(&node.template_source).map_err(|e| e.at_template(&node.name, &node.template_path))?;
        documents.push(document);
    }

    let mut scripts = Vec::with_capacity(chain.len());
    for (node, document) in chain.nodes.iter().zip(&documents) {
        let script = render(document, &node.variables).map_err(|e| e.at_template(&node.name, &node.template_path))?;
        tracing::debug!("Rendered {} ({} instructions)", node.label(), script.instructions().count());
        scripts.push(script);
    }

    let backend = chain.settings.backend;
    let mut prepared = Vec::with_capacity(chain.len());
    for (node, script) in chain.nodes.iter().zip(scripts) {
        let formatted = backend.format(&script).map_err(|e| e.at_template(&node.name, &node.template_path))?;
        let manifest = BuildManifest::new(chain, node, &script);
        let context = assemble(node, &script, &formatted, &manifest, &build_dir.join(&node.tag))?;
        prepared.push(PreparedImage {
            context,
            script,
            formatted,
        });
    }
    Ok(prepared)
}

/// Build `chain` into its final image.
///
/// # Errors
///
/// Template and staging errors from [`prepare`],
/// [`VelocityError::BackendNotAvailable`] when the backend is missing, and
/// [`VelocityError::BackendFailed`] for a failing image build.
pub async fn build(chain: &BuildChain, build_dir: &Path, options: &BuildOptions) -> Result<BuildReport> {
    let root = chain.root().ok_or_else(|| VelocityError::ConfigError {
        message: "build chain is empty".to_string(),
    })?;
    let final_name = options.name.clone().unwrap_or_else(|| chain.default_tag());

    if options.clean {
        tracing::info!("Cleaning build directory {}", build_dir.display());
        clear_dir(build_dir)?;
    }
    ensure_dir(build_dir)?;

    let prepared = prepare(chain, build_dir)?;
    let contexts: Vec<BuildContext> = prepared.into_iter().map(|p| p.context).collect();

    if options.dry_run {
        tracing::info!("Dry run: {} build context(s) assembled in {}", contexts.len(), build_dir.display());
        return Ok(BuildReport {
            contexts,
            final_name,
            built: false,
            artifact: None,
        });
    }

    let backend = chain.settings.backend;
    let executable = backend.locate()?;
    tracing::debug!("Using {} at {}", backend, executable.display());

    for (node, context) in chain.nodes.iter().zip(&contexts) {
        let log = context.log_path();
        if log.exists() {
            std::fs::remove_file(&log).with_context(|| format!("Failed to reset {}", log.display()))?;
        }

        tracing::info!("Building {} -> {}", node.label(), node.image_ref);
        let command = backend.build_command(&context.dir, &context.script_path(), &node.image_ref, &node.arguments);
        let outcome = command
            .execute_logged(&log, options.verbose)
            .await
            .with_context(|| format!("Failed to run the {backend} build of '{}'", node.name))?;

        if !outcome.success() {
            let error = VelocityError::BackendFailed {
                image: node.name.clone(),
                status: outcome.status,
                log: log.display().to_string(),
            };
            context.mark_failed(&error.to_string());
            return Err(error.into());
        }
    }

    let artifact = if let Some(tag) = backend.tag_command(&root.image_ref, &final_name) {
        let log = contexts.last().map(BuildContext::log_path).unwrap_or_else(|| build_dir.join("log"));
        let outcome = tag.execute_logged(&log, options.verbose).await?;
        if !outcome.success() {
            return Err(VelocityError::BackendFailed {
                image: final_name,
                status: outcome.status,
                log: log.display().to_string(),
            }
            .into());
        }
        None
    } else {
        let file = if final_name.ends_with(".sif") {
            final_name.clone()
        } else {
            format!("{final_name}.sif")
        };
        let destination = options.output_dir.join(file);
        copy_path(Path::new(&root.image_ref), &destination)?;
        Some(destination)
    };

    tracing::info!("Built {final_name}");
    Ok(BuildReport {
        contexts,
        final_name,
        built: true,
        artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::test_utils::{ImageRepoFixture, ScriptedPrologRunner, test_options};
    use std::fs;

    fn resolve(repo: &ImageRepoFixture, target: &str) -> BuildChain {
        let store = repo.store();
        let runner = ScriptedPrologRunner::new();
        Resolver::new(&store, &runner, test_options(&repo.build_dir())).resolve(target).unwrap()
    }

    #[test]
    fn test_prepare_chains_base_images() {
        let repo = ImageRepoFixture::new()
            .unwrap()
            .image("base", "versions: [{ spec: '1' }]", "@from ubuntu:22.04\n@run apt-get update\n")
            .unwrap()
            .image("app", "versions: [{ spec: '2' }]\ndependencies: [base]", "@from {{ __base__ }}\n@run make\n")
            .unwrap();
        let chain = resolve(&repo, "app");

        let prepared = prepare(&chain, &repo.build_dir()).unwrap();
        assert_eq!(prepared.len(), 2);
        let base_ref = &chain.nodes[0].image_ref;
        assert!(prepared[1].formatted.starts_with(&format!("FROM {base_ref}\n")));
        assert!(prepared[0].context.dir.ends_with(&chain.nodes[0].tag));
    }

    #[test]
    fn test_template_error_stops_before_assembly() {
        let repo = ImageRepoFixture::new()
            .unwrap()
            .image("base", "versions: [{ spec: '1' }]", "@from ubuntu\n")
            .unwrap()
            .image("app", "versions: [{ spec: '1' }]\ndependencies: [base]", "@from x\n@arg TOKEN\n")
            .unwrap();
        let chain = resolve(&repo, "app");

        let err = prepare(&chain, &repo.build_dir()).unwrap_err();
        let VelocityError::UndefinedVariable {
            variable,
            location,
            ..
        } = err
        else {
            panic!("expected undefined variable, got {err:?}");
        };
        assert_eq!(variable, "TOKEN");
        assert_eq!(location.image.as_deref(), Some("app"));
        assert_eq!(location.line, 2);
        assert_eq!(fs::read_dir(repo.build_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_with_clean() {
        let repo = ImageRepoFixture::new()
            .unwrap()
            .image("app", "versions: [{ spec: '1' }]", "@from scratch\n")
            .unwrap();
        fs::write(repo.build_dir().join("stale"), "x").unwrap();
        let chain = resolve(&repo, "app");

        let options = BuildOptions {
            clean: true,
            ..BuildOptions::dry_run()
        };
        let report = build(&chain, &repo.build_dir(), &options).await.unwrap();
        assert!(!report.built);
        assert_eq!(report.final_name, "app-1_local-ubuntu");
        assert!(!repo.build_dir().join("stale").exists());
        assert!(report.contexts[0].script_path().exists());
    }
}
