//! Build context assembly.
//!
//! A build context is the directory a backend builds one chain image from:
//!
//! ```text
//! <build_dir>/<name>-<version>-<image_id>/
//! ├── script             # formatted Dockerfile / definition file
//! ├── <copy sources>     # staged from the image's files/ at their relative paths
//! ├── manifest.json      # chain, versions, variables, side tables
//! ├── variables          # export NAME='value' lines
//! ├── log                # backend output (written by the build step)
//! └── .velocity-failed   # present only after a failed assembly or build
//! ```
//!
//! Assembly validates every copy before writing anything, so a staging defect never
//! leaves a context that looks complete.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::constants::{FAILED_MARKER, FILES_DIR, LOG_FILE, MANIFEST_FILE, SCRIPT_FILE, VARIABLES_FILE};
use crate::core::VelocityError;
use crate::resolver::ChainNode;
use crate::templating::BuildScript;
use crate::utils::fs::{atomic_write, copy_path, ensure_dir};

use super::manifest::BuildManifest;

/// An assembled build context directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub image: String,
    pub dir: PathBuf,
}

impl BuildContext {
    #[must_use]
    pub fn new(image: &str, dir: &Path) -> Self {
        Self {
            image: image.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.dir.join(SCRIPT_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn variables_path(&self) -> PathBuf {
        self.dir.join(VARIABLES_FILE)
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(FAILED_MARKER)
    }

    /// Whether the context carries a failure marker.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.marker_path().exists()
    }

    /// Mark the context failed, recording `reason` in the marker file.
    pub fn mark_failed(&self, reason: &str) {
        let result = ensure_dir(&self.dir).and_then(|()| atomic_write(&self.marker_path(), format!("{reason}\n").as_bytes()));
        if let Err(e) = result {
            tracing::warn!("Could not mark {} as failed: {e:#}", self.dir.display());
        }
    }
}

/// A file or directory to stage, with its source on disk.
#[derive(Debug)]
struct StagedPath {
    source: PathBuf,
    relative: String,
}

/// Assemble the build context of `node` in `dest`.
///
/// `formatted` is the backend-native script for `script`. An existing context is reused;
/// its script, manifest and staged files are overwritten.
///
/// # Errors
///
/// Returns [`VelocityError::Staging`] when a copy source does not exist, a copy source
/// escapes `files/`, two copies share a destination, or the directory cannot be
/// written. The context is marked failed in every case.
pub fn assemble(
    node: &ChainNode,
    script: &BuildScript,
    formatted: &str,
    manifest: &BuildManifest,
    dest: &Path,
) -> Result<BuildContext, VelocityError> {
    let context = BuildContext::new(&node.name, dest);

    match stage(&context, node, script, formatted, manifest) {
        Ok(()) => {
            let marker = context.marker_path();
            if marker.exists() {
                fs::remove_file(&marker)?;
            }
            tracing::debug!("Assembled build context {}", dest.display());
            Ok(context)
        }
        Err(error) => {
            context.mark_failed(&error.to_string());
            Err(error)
        }
    }
}

fn stage(
    context: &BuildContext,
    node: &ChainNode,
    script: &BuildScript,
    formatted: &str,
    manifest: &BuildManifest,
) -> Result<(), VelocityError> {
    let staging = |reason: String| VelocityError::Staging {
        image: node.name.clone(),
        reason,
    };
    let plan = plan_staging(node, script)?;

    let write = |path: &Path, content: &[u8]| atomic_write(path, content).map_err(|e| staging(format!("{e:#}")));
    ensure_dir(&context.dir).map_err(|e| staging(format!("{e:#}")))?;
    write(&context.script_path(), formatted.as_bytes())?;

    for item in &plan {
        let target = context.dir.join(&item.relative);
        copy_path(&item.source, &target).map_err(|e| staging(format!("{e:#}")))?;
        tracing::trace!("Staged {} -> {}", item.source.display(), target.display());
    }

    write(&context.manifest_path(), manifest.to_json()?.as_bytes())?;
    write(&context.variables_path(), node.variables.to_exports().as_bytes())?;
    Ok(())
}

/// Check every copy and `files` entry, returning what to stage.
fn plan_staging(node: &ChainNode, script: &BuildScript) -> Result<Vec<StagedPath>, VelocityError> {
    let staging = |reason: String| VelocityError::Staging {
        image: node.name.clone(),
        reason,
    };
    let files_dir = node.spec.path.as_ref().map(|p| p.join(FILES_DIR));

    let mut plan: Vec<StagedPath> = Vec::new();
    let mut add = |relative: &str, what: &str| -> Result<(), VelocityError> {
        let path = Path::new(relative);
        if relative.is_empty()
            || path.is_absolute()
            || path.components().any(|c| matches!(c, Component::ParentDir))
        {
            return Err(staging(format!("{what} '{relative}' must be a relative path inside {FILES_DIR}/")));
        }
        let source = files_dir
            .as_ref()
            .map(|dir| dir.join(path))
            .filter(|source| source.exists())
            .ok_or_else(|| staging(format!("{what} '{relative}' does not exist in {FILES_DIR}/")))?;
        if !plan.iter().any(|p| p.relative == relative) {
            plan.push(StagedPath {
                source,
                relative: relative.to_string(),
            });
        }
        Ok(())
    };

    let mut destinations: BTreeMap<String, usize> = BTreeMap::new();
    for copy in &script.copies {
        let destination = copy_target(&copy.source, &copy.destination);
        if let Some(&first) = destinations.get(&destination) {
            return Err(staging(format!(
                "destination '{destination}' is targeted by @copy on lines {first} and {}",
                copy.line
            )));
        }
        destinations.insert(destination, copy.line);
        add(&copy.source, "@copy source")?;
    }
    for file in &node.spec.files {
        add(file, "file entry")?;
    }
    Ok(plan)
}

/// The path a copy writes inside the image.
///
/// A destination ending in `/` is a directory that receives the source under its own name.
fn copy_target(source: &str, destination: &str) -> String {
    let trimmed = destination.trim_end_matches('/');
    if !destination.ends_with('/') {
        return trimmed.to_string();
    }
    let base = Path::new(source.trim_end_matches('/'))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{trimmed}/{base}")
}
